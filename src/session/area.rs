//! Pluggable key-value storage substrate for session persistence.
//!
//! Two areas exist: a durable sqlite-backed area (preferred) and a
//! process-local in-memory fallback for contexts without a usable disk
//! path. [`select_area`] picks one exactly once per process; the choice
//! is not revisited mid-session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

/// Storage substrate failure.
#[derive(Debug, Error)]
pub enum AreaError {
    #[error("sqlite storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A named-slot string store. Values are opaque to the area; the caller
/// owns serialization. Last write wins, no versioning.
#[async_trait]
pub trait StorageArea: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AreaError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AreaError>;
    async fn remove(&self, key: &str) -> Result<(), AreaError>;
}

// ── Durable area (sqlite) ───────────────────────────────────────

/// Sqlite-backed area. A single `slots` table; writes are
/// `INSERT OR REPLACE` so a slot is always overwritten wholesale.
pub struct SqliteArea {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteArea {
    /// Open (or create) the area database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, AreaError> {
        let conn = rusqlite::Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, AreaError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, AreaError> {
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS slots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StorageArea for SqliteArea {
    async fn get(&self, key: &str) -> Result<Option<String>, AreaError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT value FROM slots WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        );

        match row {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AreaError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO slots (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, now],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AreaError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM slots WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

// ── Fallback area (in-memory) ───────────────────────────────────

/// Process-local fallback area for contexts without a durable path.
/// Contents die with the process.
#[derive(Default)]
pub struct MemoryArea {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageArea for MemoryArea {
    async fn get(&self, key: &str) -> Result<Option<String>, AreaError> {
        Ok(self.slots.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AreaError> {
        self.slots.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AreaError> {
        self.slots.write().remove(key);
        Ok(())
    }
}

// ── Selection ───────────────────────────────────────────────────

/// Pick the storage area for this process. Called once at bootstrap.
///
/// A usable durable path wins; anything else falls back to the
/// in-memory area rather than aborting, so a broken disk degrades to
/// "signed out on restart" instead of a dead process.
pub fn select_area(db_path: Option<&Path>) -> Arc<dyn StorageArea> {
    match db_path {
        Some(path) => match SqliteArea::open(path) {
            Ok(area) => {
                tracing::info!(path = %path.display(), "Using durable session storage");
                Arc::new(area)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Durable session storage unavailable, falling back to in-memory"
                );
                Arc::new(MemoryArea::new())
            }
        },
        None => {
            tracing::debug!("No storage path configured, using in-memory session storage");
            Arc::new(MemoryArea::new())
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
