//! Session value types shared by the store, the relay, and its peers.
//!
//! A [`Session`] is an opaque credential bundle: it is replaced wholesale
//! on every auth change and never patched field by field. Absence of a
//! session (`None`) is a valid, distinct state meaning "signed out".

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub mod area;
pub mod store;

pub use area::{select_area, AreaError, MemoryArea, SqliteArea, StorageArea};
pub use store::SessionStore;

/// Refresh this many seconds before the recorded expiry to avoid handing
/// out a token that dies mid-request.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Identity embedded in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Backend user UUID.
    pub id: String,
    /// Primary email, when the backend exposes it.
    pub email: Option<String>,
}

/// An authenticated session issued by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token presented on data calls.
    pub access_token: String,
    /// Token exchanged for a fresh access token.
    pub refresh_token: String,
    /// Unix seconds when the access token expires. `0` = unknown.
    pub expires_at: i64,
    /// The user this session belongs to.
    pub user: AuthUser,
}

impl Session {
    /// Build a session from raw token material.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
        user: AuthUser,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            user,
        }
    }

    /// True when the access token is past (or within [`EXPIRY_MARGIN_SECS`]
    /// of) its recorded expiry. Sessions with unknown expiry never report
    /// expired; the backend rejects them on first use instead.
    pub fn is_expired(&self) -> bool {
        if self.expires_at == 0 {
            return false;
        }
        Utc::now().timestamp() >= self.expires_at - EXPIRY_MARGIN_SECS
    }
}

/// Labels on the backend's auth-state-change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthChangeEvent {
    #[serde(rename = "INITIAL_SESSION")]
    InitialSession,
    #[serde(rename = "SIGNED_IN")]
    SignedIn,
    #[serde(rename = "TOKEN_REFRESHED")]
    TokenRefreshed,
    #[serde(rename = "SIGNED_OUT")]
    SignedOut,
}

impl AuthChangeEvent {
    /// Sign-out is the one event whose `None` session still fans out to
    /// peers; other null-session events are indeterminate transients.
    pub fn is_sign_out(self) -> bool {
        matches!(self, Self::SignedOut)
    }
}

/// One change on the backend's auth stream: the label plus the session
/// that is now current (or `None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

// ── Tests ───────────────────────────────────────────────────────
