//! Environment-derived configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::relay::bus::DEFAULT_BUS_CAPACITY;
use crate::session::store::DEFAULT_SLOT_KEY;

/// Hosted backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL (e.g., https://xxxx.supabase.co).
    pub url: String,
    /// Anon key for RLS-scoped client operations.
    pub anon_key: String,
}

impl SupabaseConfig {
    /// Load from `SUPABASE_URL` / `SUPABASE_ANON_KEY`. Returns `None`
    /// when either is missing or empty.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok()?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").ok()?;

        if url.is_empty() || anon_key.is_empty() {
            return None;
        }

        Some(Self { url, anon_key })
    }
}

/// Relay process settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Durable session database path. `None` selects the in-memory
    /// fallback area.
    pub storage_path: Option<PathBuf>,
    /// Slot name the session persists under.
    pub slot_key: String,
    /// Request-queue and broadcast-ring capacity.
    pub bus_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            slot_key: DEFAULT_SLOT_KEY.to_string(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Defaults, with the storage path taken from `JOBTRAIL_STATE_DIR`
    /// when set (the database lands at `<dir>/session.db`).
    pub fn from_env() -> Self {
        let storage_path = std::env::var("JOBTRAIL_STATE_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(|dir| PathBuf::from(dir).join("session.db"));

        Self {
            storage_path,
            ..Self::default()
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
