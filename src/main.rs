use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobtrail::backend::SupabaseAuth;
use jobtrail::config::{RelayConfig, SupabaseConfig};
use jobtrail::relay;
use jobtrail::session::{select_area, SessionStore};

/// Background session relay for the jobtrail tracker.
#[derive(Debug, Parser)]
#[command(name = "jobtrail", version, about)]
struct Cli {
    /// Durable session database path (overrides JOBTRAIL_STATE_DIR).
    #[arg(long)]
    storage: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let supabase = SupabaseConfig::from_env()
        .context("SUPABASE_URL and SUPABASE_ANON_KEY must be set")?;
    let mut config = RelayConfig::from_env();
    if cli.storage.is_some() {
        config.storage_path = cli.storage;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting jobtrail relay");

    // Process root owns construction; everything below is injected.
    let backend = Arc::new(SupabaseAuth::new(supabase)?);
    let area = select_area(config.storage_path.as_deref());
    let store = SessionStore::with_slot(area, config.slot_key.clone());
    let (bus, listener) = relay::message_bus(config.bus_capacity);

    let handle = relay::start(backend, store, listener).await;

    // Keep a peer end alive so the request channel stays open for
    // late-joining contexts.
    let _bus = bus;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    handle.shutdown().await;
    Ok(())
}
