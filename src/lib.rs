//! jobtrail — session relay core for a job-application tracker.
//!
//! The dashboard and its companion capture process share one
//! authenticated session. This crate implements the machinery that keeps
//! them agreeing on it:
//!
//! - [`session`]: the session value type and its single-slot durable
//!   store over a pluggable storage area.
//! - [`relay`]: the Background Relay (sole owner of the live backend
//!   connection), the peer messaging client, and the bus between them.
//! - [`backend`]: the consumed Supabase-shaped auth and data clients.
//! - [`records`]: the product's plain row entities.
//!
//! Clients are constructed explicitly by the process root and injected;
//! the relay starts via [`relay::start`] and stops through the returned
//! handle. Nothing registers listeners as an import side-effect.

pub mod backend;
pub mod config;
pub mod records;
pub mod relay;
pub mod session;

pub use backend::{AuthBackend, BackendError};
pub use config::{RelayConfig, SupabaseConfig};
pub use relay::{PeerClient, RelayHandle};
pub use session::{AuthChangeEvent, AuthEvent, AuthUser, Session, SessionStore};
