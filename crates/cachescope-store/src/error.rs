//! Error types for the store module.

use cachescope_core::{QueryHash, SerializationError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Snapshot could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// No query with this hash is resident.
    #[error("query not found: {0}")]
    QueryNotFound(QueryHash),

    /// Refetch requested for a query with no registered fetcher.
    #[error("query {0} has no fetcher")]
    NoFetcher(QueryHash),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking database task was cancelled or panicked.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
