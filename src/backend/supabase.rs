//! Supabase-shaped backend clients.
//!
//! - [`SupabaseAuth`]: the authoritative auth connection (GoTrue REST).
//!   Holds the in-memory current session, refreshes it when expired, and
//!   emits every change on an auth-event stream.
//! - [`SupabaseData`]: PostgREST row client for the tracking product's
//!   `job_applications` table, plus a polling change feed.
//!
//! ## Design
//! - HTTP client (reqwest) with a 30 second timeout
//! - `apikey` anon header on every call; user bearer token where one applies
//! - Non-2xx responses surface status + body text to the caller
//! - Row Level Security compatible: data calls carry the user's token

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::backend::{AuthBackend, AuthEventStream, BackendError};
use crate::config::SupabaseConfig;
use crate::records::JobApplication;
use crate::session::{AuthChangeEvent, AuthEvent, AuthUser, Session};

/// Table holding tracked applications.
const APPLICATIONS_TABLE: &str = "job_applications";

/// Capacity of the auth-event ring. Subscribers that lag this far are
/// the relay's problem, not ours.
const AUTH_EVENT_CAPACITY: usize = 32;

/// Require a 2xx response or surface status + body to the caller.
async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

// ── GoTrue wire shapes ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    email: Option<String>,
}

impl From<UserPayload> for AuthUser {
    fn from(payload: UserPayload) -> Self {
        Self {
            id: payload.id,
            email: payload.email,
        }
    }
}

impl TokenResponse {
    fn into_session(self) -> Result<Session, BackendError> {
        let user = self
            .user
            .ok_or_else(|| BackendError::Malformed("token response without user".into()))?;

        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs))
            .unwrap_or(0);

        Ok(Session::new(
            self.access_token,
            self.refresh_token,
            expires_at,
            user.into(),
        ))
    }
}

// ── Auth client ──────────────────────────────────────────────────

/// GoTrue auth client. The process root constructs exactly one and hands
/// it to the Background Relay; nothing else talks to the auth service.
pub struct SupabaseAuth {
    config: SupabaseConfig,
    http: reqwest::Client,
    current: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseAuth {
    pub fn new(config: SupabaseConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            config,
            http,
            current: RwLock::new(None),
            events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.url, path)
    }

    fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        // No subscribers yet is fine; the stream is fire-and-forget.
        let _ = self.events.send(AuthEvent { event, session });
    }

    /// Resolve the identity behind an access token.
    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let resp = self
            .http
            .get(self.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let payload: UserPayload = expect_success(resp).await?.json().await?;
        Ok(payload.into())
    }

    /// Exchange a refresh token for a fresh session.
    async fn refresh_grant(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let resp = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let payload: TokenResponse = expect_success(resp).await?.json().await?;
        payload.into_session()
    }

    #[cfg(test)]
    pub(crate) fn seed_session(&self, session: Option<Session>) {
        *self.current.write() = session;
    }
}

#[async_trait::async_trait]
impl AuthBackend for SupabaseAuth {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let current = self.current.read().clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let refreshed = self.refresh_grant(&session.refresh_token).await?;
        *self.current.write() = Some(refreshed.clone());
        self.emit(AuthChangeEvent::TokenRefreshed, Some(refreshed.clone()));
        Ok(Some(refreshed))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Session>, BackendError> {
        let session = match self.fetch_user(access_token).await {
            Ok(user) => Session::new(access_token, refresh_token, 0, user),
            // A 401 means the handed-over access token already died;
            // the refresh token may still be good.
            Err(BackendError::Rejected { status: 401, .. }) => {
                self.refresh_grant(refresh_token).await?
            }
            Err(e) => return Err(e),
        };

        *self.current.write() = Some(session.clone());
        self.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.current.write().take();

        // Remote revocation is best-effort: local sign-out must complete
        // even when the network call fails.
        if let Some(session) = &previous {
            let result = self
                .http
                .post(self.auth_url("logout"))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;

            match result {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(
                        status = resp.status().as_u16(),
                        "Token revocation rejected, continuing local sign-out"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Token revocation failed, continuing local sign-out");
                }
                Ok(_) => {}
            }
        }

        self.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    fn subscribe(&self) -> AuthEventStream {
        self.events.subscribe()
    }
}

// ── Data client ──────────────────────────────────────────────────

/// PostgREST client for the tracking product's rows. Consumed by the
/// dashboard layer; carries the user's bearer token on every call.
#[derive(Clone)]
pub struct SupabaseData {
    config: SupabaseConfig,
    http: reqwest::Client,
}

impl SupabaseData {
    pub fn new(config: SupabaseConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, http })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder, access_token: &str) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
    }

    /// Insert a row; returns the stored representation.
    pub async fn create(
        &self,
        access_token: &str,
        application: &JobApplication,
    ) -> Result<JobApplication, BackendError> {
        let request = self
            .http
            .post(self.table_url(APPLICATIONS_TABLE))
            .header("Prefer", "return=representation")
            .json(application);

        let resp = self.authed(request, access_token).send().await?;
        let rows: Vec<JobApplication> = expect_success(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("insert returned no representation".into()))
    }

    /// Fetch one row by id.
    pub async fn get(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<Option<JobApplication>, BackendError> {
        let url = format!("{}?id=eq.{}&select=*", self.table_url(APPLICATIONS_TABLE), id);
        let resp = self.authed(self.http.get(&url), access_token).send().await?;
        let rows: Vec<JobApplication> = expect_success(resp).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    /// Patch a row; returns the stored representation.
    pub async fn update(
        &self,
        access_token: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<JobApplication, BackendError> {
        let url = format!("{}?id=eq.{}", self.table_url(APPLICATIONS_TABLE), id);
        let request = self
            .http
            .patch(&url)
            .header("Prefer", "return=representation")
            .json(patch);

        let resp = self.authed(request, access_token).send().await?;
        let rows: Vec<JobApplication> = expect_success(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("update matched no row".into()))
    }

    /// Delete a row. Deleting a missing row is not an error.
    pub async fn delete(&self, access_token: &str, id: &str) -> Result<(), BackendError> {
        let url = format!("{}?id=eq.{}", self.table_url(APPLICATIONS_TABLE), id);
        let resp = self.authed(self.http.delete(&url), access_token).send().await?;
        expect_success(resp).await?;
        Ok(())
    }

    /// All rows owned by a user, most recently updated first.
    pub async fn list_for_user(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Vec<JobApplication>, BackendError> {
        let url = format!(
            "{}?user_id=eq.{}&select=*&order=updated_at.desc",
            self.table_url(APPLICATIONS_TABLE),
            user_id
        );
        let resp = self.authed(self.http.get(&url), access_token).send().await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    /// Rows owned by a user changed strictly after `since`, oldest first.
    async fn changed_since(
        &self,
        access_token: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<JobApplication>, BackendError> {
        let mut url = format!(
            "{}?user_id=eq.{}&select=*&order=updated_at.asc",
            self.table_url(APPLICATIONS_TABLE),
            user_id
        );
        if let Some(since) = since {
            url.push_str(&format!("&updated_at=gt.{}", since.to_rfc3339()));
        }
        let resp = self.authed(self.http.get(&url), access_token).send().await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    /// Polling change feed over a user's rows. The first delivery is the
    /// current snapshot; every later delivery holds only rows updated
    /// since the previous one. Poll failures are logged and retried on
    /// the next tick. Dropping the returned handle ends the feed.
    pub fn subscribe_to_changes<F>(
        &self,
        access_token: String,
        user_id: String,
        poll_interval: Duration,
        on_change: F,
    ) -> Subscription
    where
        F: Fn(Vec<JobApplication>) + Send + Sync + 'static,
    {
        let client = self.clone();
        let task = tokio::spawn(async move {
            let mut last_seen: Option<DateTime<Utc>> = None;
            loop {
                tokio::time::sleep(poll_interval).await;
                match client.changed_since(&access_token, &user_id, last_seen).await {
                    Ok(rows) if !rows.is_empty() => {
                        last_seen = rows.iter().map(|row| row.updated_at).max().or(last_seen);
                        on_change(rows);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Change poll failed");
                    }
                }
            }
        });

        Subscription { task }
    }
}

/// Handle on a running change feed. The feed stops when this is dropped
/// or explicitly stopped.
pub struct Subscription {
    task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Tests ────────────────────────────────────────────────────────
