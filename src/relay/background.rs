//! The Background Relay: sole owner of the live backend connection and
//! single source of truth for "what is the current session".
//!
//! Lifecycle per process: bootstrap (hydrate the backend from the
//! persisted session, best-effort), reconcile (persist the backend's own
//! view so the store never lags it), then a single event loop that
//! serializes backend auth events, peer requests, and shutdown. Within
//! one auth event the order is strict: the store is durable before any
//! peer hears about the change.
//!
//! Started explicitly via [`start`], which returns a [`RelayHandle`]
//! disposer; nothing registers listeners as an import side-effect.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::backend::AuthBackend;
use crate::relay::bus::{BusListener, Envelope, UpdateBroadcast};
use crate::relay::protocol::{self, RelayRequest, RelayResponse, SessionUpdate};
use crate::session::{AuthEvent, SessionStore};

/// Disposer for a running relay. Dropping it (or calling
/// [`RelayHandle::shutdown`]) stops the event loop.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the loop to stop and wait for it to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Boot the relay and hand back its disposer.
///
/// The auth-change subscription is registered exactly once, before
/// reconcile, so changes the backend makes during startup are buffered
/// rather than lost.
pub async fn start(
    backend: Arc<dyn AuthBackend>,
    store: SessionStore,
    listener: BusListener,
) -> RelayHandle {
    let mut events = backend.subscribe();

    bootstrap(backend.as_ref(), &store).await;
    reconcile(backend.as_ref(), &store).await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut listener = listener;
        let updates = listener.update_handle();
        let mut events_open = true;
        let mut requests_open = true;

        tracing::info!("Session relay running");

        loop {
            tokio::select! {
                // Biased: pending auth events beat pending requests, so a
                // request sent after an event always observes its effects.
                biased;

                _ = shutdown_rx.changed() => break,

                event = events.recv(), if events_open => match event {
                    Ok(event) => apply_auth_event(&store, &updates, event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Auth event stream lagged, skipping to latest");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Auth event stream closed");
                        events_open = false;
                    }
                },

                envelope = listener.next_request(), if requests_open => match envelope {
                    Some(envelope) => {
                        answer_request(backend.as_ref(), &store, envelope).await;
                    }
                    None => {
                        tracing::debug!("All peer handles dropped");
                        requests_open = false;
                    }
                },
            }

            if !events_open && !requests_open {
                break;
            }
        }

        tracing::info!("Session relay stopped");
    });

    RelayHandle {
        shutdown: shutdown_tx,
        task,
    }
}

/// Hydrate the backend client from the persisted session, best-effort.
/// The backend re-validates on the first real call, so a failed hydrate
/// just means starting signed out.
async fn bootstrap(backend: &dyn AuthBackend, store: &SessionStore) {
    let persisted = match store.load().await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read persisted session at startup");
            None
        }
    };

    let Some(session) = persisted else {
        tracing::debug!("No persisted session to hydrate");
        return;
    };

    match backend
        .set_session(&session.access_token, &session.refresh_token)
        .await
    {
        Ok(_) => tracing::debug!(user = %session.user.id, "Hydrated backend from persisted session"),
        Err(e) => tracing::debug!(error = %e, "Session hydrate failed, continuing signed out"),
    }
}

/// Persist the backend's authoritative view when it has one, overwriting
/// whatever bootstrap loaded. The store must never lag the backend when
/// both hold a session.
async fn reconcile(backend: &dyn AuthBackend, store: &SessionStore) {
    match backend.get_session().await {
        Ok(Some(session)) => {
            if let Err(e) = store.save(Some(&session)).await {
                tracing::warn!(error = %e, "Failed to persist reconciled session");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Backend session query failed during reconcile"),
    }
}

/// One auth change: persist unconditionally, then broadcast unless this
/// is an indeterminate transient (null session that is not a sign-out).
async fn apply_auth_event(store: &SessionStore, updates: &UpdateBroadcast, event: AuthEvent) {
    let AuthEvent { event, session } = event;

    if let Err(e) = store.save(session.as_ref()).await {
        tracing::warn!(error = %e, "Failed to persist auth change");
    }

    if session.is_some() || event.is_sign_out() {
        let reached = updates.send(SessionUpdate { payload: session });
        tracing::debug!(event = ?event, peers = reached, "Session update broadcast");
    } else {
        tracing::debug!(event = ?event, "Transient null session persisted without broadcast");
    }
}

/// Answer one peer envelope. Payloads that are not relay requests are
/// dropped without a response (foreign traffic on a shared channel), as
/// are requests whose backend call fails; the requester observes an
/// unacknowledged send either way.
async fn answer_request(backend: &dyn AuthBackend, store: &SessionStore, envelope: Envelope) {
    let Some(request) = protocol::parse_request(&envelope.payload) else {
        tracing::debug!("Ignoring non-relay traffic on the session channel");
        return;
    };

    let response = match request {
        RelayRequest::Get => match backend.get_session().await {
            Ok(session) => RelayResponse::session(session),
            Err(e) => {
                tracing::warn!(error = %e, "Backend session query failed, leaving `get` unanswered");
                return;
            }
        },

        RelayRequest::Set {
            payload: Some(session),
        } => match backend
            .set_session(&session.access_token, &session.refresh_token)
            .await
        {
            Ok(applied) => {
                // Persist the backend's hydrated view when it returns
                // one; the raw handed-over session otherwise.
                let effective = applied.or(Some(session));
                if let Err(e) = store.save(effective.as_ref()).await {
                    tracing::warn!(error = %e, "Failed to persist pushed session");
                }
                RelayResponse::ack()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backend rejected pushed session, leaving `set` unanswered");
                return;
            }
        },

        // Null `set` persists absence without revoking backend tokens;
        // sign-out intent arrives as `clear`.
        RelayRequest::Set { payload: None } => {
            if let Err(e) = store.save(None).await {
                tracing::warn!(error = %e, "Failed to clear persisted session");
            }
            RelayResponse::ack()
        }

        RelayRequest::Clear => match backend.sign_out().await {
            Ok(()) => {
                if let Err(e) = store.save(None).await {
                    tracing::warn!(error = %e, "Failed to clear persisted session");
                }
                RelayResponse::ack()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backend sign-out failed, leaving `clear` unanswered");
                return;
            }
        },
    };

    let value = serde_json::to_value(&response).unwrap_or(Value::Null);
    if envelope.reply.send(value).is_err() {
        tracing::debug!("Requester went away before the response was sent");
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{session_fixture, ScriptedBackend};
    use crate::relay::bus::{message_bus, MessageBus, SendOutcome, DEFAULT_BUS_CAPACITY};
    use crate::session::area::{MemoryArea, StorageArea};
    use crate::session::AuthChangeEvent;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Rig {
        backend: Arc<ScriptedBackend>,
        store: SessionStore,
        bus: MessageBus,
        handle: RelayHandle,
    }

    async fn rig_with(backend: ScriptedBackend) -> Rig {
        let area = Arc::new(MemoryArea::new());
        let store = SessionStore::new(area as Arc<dyn StorageArea>);
        rig_with_store(backend, store).await
    }

    async fn rig_with_store(backend: ScriptedBackend, store: SessionStore) -> Rig {
        let backend = Arc::new(backend);
        let (bus, listener) = message_bus(DEFAULT_BUS_CAPACITY);
        let handle = start(backend.clone(), store.clone(), listener).await;
        Rig {
            backend,
            store,
            bus,
            handle,
        }
    }

    async fn request(bus: &MessageBus, request: RelayRequest) -> SendOutcome {
        bus.request(serde_json::to_value(request).unwrap()).await
    }

    fn expect_response(outcome: SendOutcome) -> RelayResponse {
        match outcome {
            SendOutcome::Delivered(value) => serde_json::from_value(value).unwrap(),
            other => panic!("expected Delivered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_answers_with_backend_session() {
        let session = session_fixture("access-1");
        let rig = rig_with(ScriptedBackend::with_session(session.clone())).await;

        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(Some(session)));
    }

    #[tokio::test]
    async fn get_answers_null_when_signed_out() {
        let rig = rig_with(ScriptedBackend::new()).await;

        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(None));
    }

    #[tokio::test]
    async fn set_then_get_reads_the_pushed_session() {
        let rig = rig_with(ScriptedBackend::new()).await;
        let session = session_fixture("access-pushed");

        let response = expect_response(
            request(
                &rig.bus,
                RelayRequest::Set {
                    payload: Some(session.clone()),
                },
            )
            .await,
        );
        assert_eq!(response, RelayResponse::ack());

        // The backend saw the token material and the store holds it.
        let calls = rig.backend.set_calls.lock().clone();
        assert_eq!(calls, vec![("access-pushed".into(), "refresh-1".into())]);
        assert_eq!(
            rig.store.load().await.unwrap().unwrap().access_token,
            "access-pushed"
        );

        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        match response {
            RelayResponse::Session { session: Some(s) } => {
                assert_eq!(s.access_token, "access-pushed");
            }
            other => panic!("expected live session, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_signs_out_and_empties_the_store() {
        let rig = rig_with(ScriptedBackend::with_session(session_fixture("access-1"))).await;
        rig.store
            .save(Some(&session_fixture("access-1")))
            .await
            .unwrap();

        let response = expect_response(request(&rig.bus, RelayRequest::Clear).await);
        assert_eq!(response, RelayResponse::ack());
        assert_eq!(rig.backend.sign_out_calls.load(Ordering::SeqCst), 1);
        assert!(rig.store.load().await.unwrap().is_none());

        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(None));
    }

    #[tokio::test]
    async fn null_set_clears_store_without_sign_out() {
        let rig = rig_with(ScriptedBackend::new()).await;
        rig.store
            .save(Some(&session_fixture("access-1")))
            .await
            .unwrap();

        let response = expect_response(request(&rig.bus, RelayRequest::Set { payload: None }).await);
        assert_eq!(response, RelayResponse::ack());
        assert!(rig.store.load().await.unwrap().is_none());
        assert_eq!(rig.backend.sign_out_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sign_in_event_persists_then_broadcasts() {
        let rig = rig_with(ScriptedBackend::new()).await;
        let mut updates = rig.bus.subscribe_updates();
        let session = session_fixture("access-1");

        rig.backend
            .emit(AuthChangeEvent::SignedIn, Some(session.clone()));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.payload, Some(session.clone()));
        // Persisted before the broadcast went out.
        assert_eq!(rig.store.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn sign_out_event_broadcasts_null() {
        let rig = rig_with(ScriptedBackend::with_session(session_fixture("access-1"))).await;
        let mut updates = rig.bus.subscribe_updates();

        rig.backend.emit(AuthChangeEvent::SignedOut, None);

        let update = updates.recv().await.unwrap();
        assert_eq!(update.payload, None);
        assert!(rig.store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_null_persists_but_stays_quiet() {
        let rig = rig_with(ScriptedBackend::new()).await;
        let mut updates = rig.bus.subscribe_updates();

        rig.store
            .save(Some(&session_fixture("access-stale")))
            .await
            .unwrap();
        rig.backend.emit(AuthChangeEvent::TokenRefreshed, None);

        // A request sent after the event observes its effects: the
        // biased loop drains pending auth events first.
        let _ = expect_response(request(&rig.bus, RelayRequest::Get).await);

        assert!(rig.store.load().await.unwrap().is_none());
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn foreign_payload_gets_no_response() {
        let rig = rig_with(ScriptedBackend::new()).await;

        let outcome = rig.bus.request(json!({"type": "ping"})).await;
        assert!(matches!(outcome, SendOutcome::NoResponse));

        // The relay is still alive afterwards.
        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(None));
    }

    #[tokio::test]
    async fn backend_failure_leaves_request_unanswered() {
        let rig = rig_with(ScriptedBackend::new()).await;
        rig.backend.fail_get.store(true, Ordering::SeqCst);

        let outcome = request(&rig.bus, RelayRequest::Get).await;
        assert!(matches!(outcome, SendOutcome::NoResponse));

        rig.backend.fail_get.store(false, Ordering::SeqCst);
        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(None));
    }

    #[tokio::test]
    async fn bootstrap_hydrates_backend_from_store() {
        let area = Arc::new(MemoryArea::new());
        let store = SessionStore::new(area as Arc<dyn StorageArea>);
        store
            .save(Some(&session_fixture("access-persisted")))
            .await
            .unwrap();

        let rig = rig_with_store(ScriptedBackend::new(), store).await;

        let calls = rig.backend.set_calls.lock().clone();
        assert_eq!(calls, vec![("access-persisted".into(), "refresh-1".into())]);
        // Reconcile then re-persisted the backend's hydrated view.
        assert!(rig.store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reconcile_persists_backend_view() {
        let session = session_fixture("access-live");
        let rig = rig_with(ScriptedBackend::with_session(session.clone())).await;

        assert_eq!(rig.store.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn failed_reconcile_is_not_fatal() {
        let backend = ScriptedBackend::new();
        backend.fail_get.store(true, Ordering::SeqCst);
        let rig = rig_with(backend).await;

        rig.backend.fail_get.store(false, Ordering::SeqCst);
        let response = expect_response(request(&rig.bus, RelayRequest::Get).await);
        assert_eq!(response, RelayResponse::session(None));
    }

    #[tokio::test]
    async fn shutdown_drains_the_loop() {
        let rig = rig_with(ScriptedBackend::new()).await;

        rig.handle.shutdown().await;

        let outcome = request(&rig.bus, RelayRequest::Get).await;
        assert!(matches!(outcome, SendOutcome::NoReceiver));
    }
}
