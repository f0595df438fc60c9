//! Peer-side messaging client: a best-effort bridge from contexts
//! without a live backend connection to the Background Relay.
//!
//! Every operation degrades instead of erroring. "No one is listening"
//! is an expected transient (the relay host may be dormant) and resolves
//! to `false`/`None` with a quiet debug log; nothing here returns an
//! error across the boundary or panics without a messaging host.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::relay::bus::{MessageBus, SendOutcome};
use crate::relay::protocol::{RelayRequest, RelayResponse, SessionUpdate};
use crate::session::Session;

/// Client handle for popup/capture-style contexts.
#[derive(Clone)]
pub struct PeerClient {
    bus: Option<MessageBus>,
}

impl PeerClient {
    /// Peer attached to a live bus.
    pub fn new(bus: MessageBus) -> Self {
        Self { bus: Some(bus) }
    }

    /// Peer running outside the messaging host entirely: every send
    /// short-circuits to undelivered, every read to signed-out.
    pub fn detached() -> Self {
        Self { bus: None }
    }

    /// Hand a locally-obtained session (or absence) to the relay.
    /// Resolves `true` only when the relay acknowledged. No retry is
    /// attempted on `false`; the next natural auth event repopulates
    /// peer state.
    pub async fn push(&self, session: Option<&Session>) -> bool {
        let Some(bus) = &self.bus else {
            tracing::debug!("No messaging host available, session push dropped");
            return false;
        };

        let request = match session {
            Some(session) => RelayRequest::Set {
                payload: Some(session.clone()),
            },
            None => RelayRequest::Clear,
        };
        let payload = serde_json::to_value(&request).unwrap_or(Value::Null);

        match bus.request(payload).await {
            SendOutcome::Delivered(value) => {
                match serde_json::from_value::<RelayResponse>(value) {
                    Ok(RelayResponse::Ack { ok: true }) => true,
                    other => {
                        tracing::warn!(response = ?other, "Relay sent an unexpected push response");
                        false
                    }
                }
            }
            SendOutcome::NoReceiver => {
                tracing::debug!("Relay not listening, session push undelivered");
                false
            }
            SendOutcome::NoResponse => {
                tracing::warn!("Relay closed the channel without acknowledging the push");
                false
            }
        }
    }

    /// Ask the relay for the backend's live session. Undelivered
    /// requests degrade to `None` (signed out).
    pub async fn fetch(&self) -> Option<Session> {
        let Some(bus) = &self.bus else {
            tracing::debug!("No messaging host available, reading session as absent");
            return None;
        };

        let payload = serde_json::to_value(RelayRequest::Get).unwrap_or(Value::Null);

        match bus.request(payload).await {
            SendOutcome::Delivered(value) => {
                match serde_json::from_value::<RelayResponse>(value) {
                    Ok(RelayResponse::Session { session }) => session,
                    other => {
                        tracing::warn!(response = ?other, "Relay sent an unexpected `get` response");
                        None
                    }
                }
            }
            SendOutcome::NoReceiver => {
                tracing::debug!("Relay not listening, reading session as absent");
                None
            }
            SendOutcome::NoResponse => {
                tracing::debug!("Session request went unanswered, reading session as absent");
                None
            }
        }
    }

    /// Subscribe to the relay's `updated` broadcasts. The caller applies
    /// each session-or-absent to local state; no acknowledgement exists.
    pub fn updates(&self) -> SessionUpdates {
        SessionUpdates {
            inner: self.bus.as_ref().map(MessageBus::subscribe_updates),
        }
    }
}

/// Stream of broadcast session changes. Detached peers hold an
/// immediately-exhausted stream.
pub struct SessionUpdates {
    inner: Option<broadcast::Receiver<SessionUpdate>>,
}

impl SessionUpdates {
    /// Next announced session-or-absent; `None` when the stream is over.
    /// A lagged subscriber skips to the newest updates, which is correct
    /// for last-write-wins session state.
    pub async fn next(&mut self) -> Option<Option<Session>> {
        let rx = self.inner.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(update) => return Some(update.payload),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "Session update stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{session_fixture, ScriptedBackend};
    use crate::relay::background::{start, RelayHandle};
    use crate::relay::bus::{message_bus, DEFAULT_BUS_CAPACITY};
    use crate::session::area::{MemoryArea, StorageArea};
    use crate::session::{AuthChangeEvent, SessionStore};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    async fn live_relay() -> (Arc<ScriptedBackend>, SessionStore, PeerClient, RelayHandle) {
        let backend = Arc::new(ScriptedBackend::new());
        let area = Arc::new(MemoryArea::new());
        let store = SessionStore::new(area as Arc<dyn StorageArea>);
        let (bus, listener) = message_bus(DEFAULT_BUS_CAPACITY);
        let handle = start(backend.clone(), store.clone(), listener).await;
        (backend, store, PeerClient::new(bus), handle)
    }

    #[tokio::test]
    async fn push_session_is_acknowledged() {
        let (backend, store, peer, _relay) = live_relay().await;
        let session = session_fixture("access-1");

        assert!(peer.push(Some(&session)).await);

        let calls = backend.set_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "access-1");
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn push_absent_sends_clear() {
        let (backend, store, peer, _relay) = live_relay().await;
        store.save(Some(&session_fixture("access-1"))).await.unwrap();

        assert!(peer.push(None).await);
        assert_eq!(backend.sign_out_calls.load(Ordering::SeqCst), 1);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_returns_live_session() {
        let (backend, _store, peer, _relay) = live_relay().await;
        backend.emit(
            AuthChangeEvent::SignedIn,
            Some(session_fixture("access-live")),
        );

        let session = peer.fetch().await.unwrap();
        assert_eq!(session.access_token, "access-live");
    }

    #[tokio::test]
    async fn push_without_relay_resolves_false_without_corruption() {
        let area = Arc::new(MemoryArea::new());
        let store = SessionStore::new(area as Arc<dyn StorageArea>);
        store.save(Some(&session_fixture("access-kept"))).await.unwrap();

        let (bus, listener) = message_bus(DEFAULT_BUS_CAPACITY);
        drop(listener); // relay never started

        let peer = PeerClient::new(bus);
        assert!(!peer.push(Some(&session_fixture("access-new"))).await);
        assert!(!peer.push(None).await);

        // The store was never touched.
        let kept = store.load().await.unwrap().unwrap();
        assert_eq!(kept.access_token, "access-kept");
    }

    #[tokio::test]
    async fn fetch_without_relay_reads_absent() {
        let (bus, listener) = message_bus(DEFAULT_BUS_CAPACITY);
        drop(listener);

        let peer = PeerClient::new(bus);
        assert!(peer.fetch().await.is_none());
    }

    #[tokio::test]
    async fn detached_peer_is_inert() {
        let peer = PeerClient::detached();

        assert!(!peer.push(Some(&session_fixture("access-1"))).await);
        assert!(!peer.push(None).await);
        assert!(peer.fetch().await.is_none());

        let mut updates = peer.updates();
        assert!(updates.next().await.is_none());
    }

    #[tokio::test]
    async fn updates_follow_relay_broadcasts() {
        let (backend, _store, peer, _relay) = live_relay().await;
        let mut updates = peer.updates();

        let session = session_fixture("access-1");
        backend.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        assert_eq!(updates.next().await, Some(Some(session)));

        backend.emit(AuthChangeEvent::SignedOut, None);
        assert_eq!(updates.next().await, Some(None));
    }
}
