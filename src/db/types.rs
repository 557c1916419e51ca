use crate::types::UnknownLabel;

/// Errors specific to database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] UnknownLabel),

    #[error("Invalid stored timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Identity columns of a replica row, enough to plan a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaKey {
    pub id: String,
    pub external_record_id: Option<String>,
    pub contract_reference: String,
}
