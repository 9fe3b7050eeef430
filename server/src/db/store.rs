//! Credential store: durable username → password-hash records.
//!
//! The trait is synchronous. Callers run it on blocking worker threads
//! (`tokio::task::spawn_blocking`), next to the password hashing.

use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension};

use crate::db::DbPool;
use crate::error::StoreError;

/// Capability the auth service needs from durable storage.
pub trait CredentialStore: Send + Sync + 'static {
    /// Insert a new record. A taken username fails with [`StoreError::Duplicate`].
    fn insert(&self, username: &str, password_hash: &str) -> Result<(), StoreError>;

    /// Fetch the stored hash for `username`.
    fn lookup(&self, username: &str) -> Result<String, StoreError>;

    /// Cheap connectivity check, run once before serving.
    fn ping(&self) -> Result<(), StoreError>;
}

/// [`CredentialStore`] backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: DbPool,
}

impl SqliteCredentialStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|e| StoreError::Io(format!("DB lock error: {}", e)))
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn insert(&self, username: &str, password_hash: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![username, password_hash, now],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }

    fn lookup(&self, username: &str) -> Result<String, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT password_hash FROM users WHERE username = ?1",
            [username],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(map_sqlite_error)?
        .ok_or(StoreError::NotFound)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(map_sqlite_error)
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate
        }
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Io(other.to_string()),
    }
}
