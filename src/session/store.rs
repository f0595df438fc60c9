//! Single-slot durable session store.
//!
//! One named slot holds the serialized current session, or nothing.
//! Writes replace the slot wholesale; `save(None)` deletes it. Malformed
//! stored data reads as "signed out", never as an error and never as a
//! stale session.

use std::sync::Arc;

use crate::session::area::{AreaError, StorageArea};
use crate::session::Session;

/// Default slot name for the persisted session.
pub const DEFAULT_SLOT_KEY: &str = "jobtrail.session";

/// Persists the current session in one named slot of a [`StorageArea`].
#[derive(Clone)]
pub struct SessionStore {
    area: Arc<dyn StorageArea>,
    slot: String,
}

impl SessionStore {
    /// Store over the given area under [`DEFAULT_SLOT_KEY`].
    pub fn new(area: Arc<dyn StorageArea>) -> Self {
        Self::with_slot(area, DEFAULT_SLOT_KEY)
    }

    /// Store with an explicit slot name.
    pub fn with_slot(area: Arc<dyn StorageArea>, slot: impl Into<String>) -> Self {
        Self {
            area,
            slot: slot.into(),
        }
    }

    /// Read the stored session. A slot that fails to deserialize is
    /// logged at error level and reported as absent: failing open to
    /// "signed out" beats resurrecting garbage credentials.
    pub async fn load(&self) -> Result<Option<Session>, AreaError> {
        let Some(raw) = self.area.get(&self.slot).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::error!(
                    slot = %self.slot,
                    error = %e,
                    "Persisted session is malformed, treating as signed out"
                );
                Ok(None)
            }
        }
    }

    /// Write the session wholesale, or delete the slot when absent.
    /// Completes whether or not the stored value actually changed.
    pub async fn save(&self, session: Option<&Session>) -> Result<(), AreaError> {
        match session {
            Some(session) => {
                // Session serialization cannot fail: all fields are
                // strings and integers.
                let raw = serde_json::to_string(session)
                    .unwrap_or_else(|_| String::from("null"));
                self.area.set(&self.slot, &raw).await
            }
            None => self.area.remove(&self.slot).await,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
