//! SQLite-backed relational store: the subscriber replica and the ticket
//! primary store.
//!
//! Tickets are authoritative here; the subscriber rows are a mirror of the
//! tabular store maintained by `crate::mirror`. The file path comes from
//! configuration and is required at startup.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub mod subscribers;
pub mod tickets;
pub mod types;
pub use types::*;

/// Handle shared between the gateway, the cache's replica source and the
/// mirror. Lock guards are never held across an `.await`.
pub type SharedDb = Arc<parking_lot::Mutex<SupportDb>>;

pub struct SupportDb {
    conn: Connection,
}

impl SupportDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL so the picker can read while the mirror writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Needed for tickets.subscriber_id ON DELETE SET NULL
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::info!("Opened relational store at {}", path.display());
        Ok(Self { conn })
    }

    /// Private in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Expand a leading `~/` against the home directory.
    pub fn resolve_path(configured: &str) -> Result<std::path::PathBuf, DbError> {
        match configured.strip_prefix("~/") {
            Some(rest) => Ok(dirs::home_dir().ok_or(DbError::HomeDirNotFound)?.join(rest)),
            None => Ok(std::path::PathBuf::from(configured)),
        }
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(parking_lot::Mutex::new(self))
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp(raw.to_string()))
}

// =============================================================================
// Shared test utilities
// =============================================================================
