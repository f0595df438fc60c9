//! Hosted auth/data backend — consumed, not reimplemented.
//!
//! The relay owns the sole live connection through the [`AuthBackend`]
//! seam; the production implementation speaks to a Supabase-shaped
//! service (GoTrue auth + PostgREST rows) in [`supabase`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::session::{AuthEvent, Session};

pub mod supabase;

#[cfg(test)]
pub(crate) mod testing;

pub use supabase::{SupabaseAuth, SupabaseData};

/// Failure talking to the hosted backend. Propagated to the immediate
/// caller; nothing in this crate retries internally.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// Receiver half of the backend's auth-state-change stream.
pub type AuthEventStream = broadcast::Receiver<AuthEvent>;

/// The authoritative auth connection. Exactly one component per process
/// (the Background Relay) holds and drives an implementation.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The backend's live view of the current session. Implementations
    /// may refresh an expired session inline before answering.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Apply externally-obtained token material to the client's
    /// in-memory state. Returns the resulting (possibly re-hydrated)
    /// session.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Session>, BackendError>;

    /// Sign out. The in-memory session is always cleared; remote token
    /// revocation is best-effort.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Subscribe to auth-state changes. Every subscriber sees events
    /// emitted after the point of subscription.
    fn subscribe(&self) -> AuthEventStream;
}
