//! Wire types for the session relay channel.
//!
//! Exactly three request shapes plus one unsolicited broadcast. Requests
//! travel as tagged JSON objects; anything that does not parse as a
//! [`RelayRequest`] is foreign traffic and is ignored without a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::Session;

/// Peer → relay request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayRequest {
    /// Ask the relay for the backend's live session.
    Get,
    /// Hand the relay a locally-obtained session to apply and persist.
    /// A null payload persists absence without touching backend auth
    /// state; peers that mean "sign out" send [`RelayRequest::Clear`].
    Set { payload: Option<Session> },
    /// Sign the backend out and persist absence.
    Clear,
}

/// Relay → peer response.
///
/// Untagged on the wire: `{"ok":true}` acknowledges a mutation,
/// `{"session":...}` answers a `get`. `Ack` must stay declared first so
/// deserialization never reads `{"ok":true}` as a session envelope with
/// a defaulted-to-null field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Ack { ok: bool },
    Session { session: Option<Session> },
}

impl RelayResponse {
    pub fn ack() -> Self {
        Self::Ack { ok: true }
    }

    pub fn session(session: Option<Session>) -> Self {
        Self::Session { session }
    }
}

/// Relay → peers broadcast announcing a session change. Fire-and-forget,
/// never acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "updated")]
pub struct SessionUpdate {
    pub payload: Option<Session>,
}

/// Parse an inbound envelope as a relay request. `None` means the
/// payload is not ours; the caller drops it silently so other listeners
/// on a shared channel can claim it.
pub fn parse_request(payload: &Value) -> Option<RelayRequest> {
    serde_json::from_value(payload.clone()).ok()
}

// ── Tests ───────────────────────────────────────────────────────
