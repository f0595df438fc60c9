//! Scripted in-memory backend for relay and peer tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::backend::{AuthBackend, AuthEventStream, BackendError};
use crate::session::{AuthChangeEvent, AuthEvent, AuthUser, Session};

/// Fixture session used across relay tests.
pub fn session_fixture(access: &str) -> Session {
    Session::new(
        access,
        "refresh-1",
        0,
        AuthUser {
            id: "user-1".into(),
            email: None,
        },
    )
}

/// An [`AuthBackend`] whose state and event stream are driven by hand.
pub struct ScriptedBackend {
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    /// When set, `get_session` fails with a rejected call.
    pub fail_get: AtomicBool,
    /// `(access_token, refresh_token)` pairs handed to `set_session`.
    pub set_calls: Mutex<Vec<(String, String)>>,
    pub sign_out_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            current: RwLock::new(None),
            events,
            fail_get: AtomicBool::new(false),
            set_calls: Mutex::new(Vec::new()),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_session(session: Session) -> Self {
        let backend = Self::new();
        *backend.current.write() = Some(session);
        backend
    }

    /// Push an event onto the auth stream, updating the live view to
    /// match.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        *self.current.write() = session.clone();
        let _ = self.events.send(AuthEvent { event, session });
    }
}

#[async_trait::async_trait]
impl AuthBackend for ScriptedBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                status: 503,
                body: "scripted failure".into(),
            });
        }
        Ok(self.current.read().clone())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Session>, BackendError> {
        self.set_calls
            .lock()
            .push((access_token.to_string(), refresh_token.to_string()));

        let session = Session::new(
            access_token,
            refresh_token,
            0,
            AuthUser {
                id: "user-1".into(),
                email: None,
            },
        );
        *self.current.write() = Some(session.clone());
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.write() = None;
        Ok(())
    }

    fn subscribe(&self) -> AuthEventStream {
        self.events.subscribe()
    }
}
