//! Error types for the store module.

use thiserror::Error;

use chronicle_core::{ChainKey, ChainTail};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Event serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backend cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Busy and locked SQLite databases and unavailable backends are
    /// transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    pub(crate) fn poisoned(what: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(format!("lock poisoned: {what}"))
    }
}

/// The chain's tail holds the largest representable sequence.
pub(crate) fn exhausted(chain: &ChainKey, tail: &ChainTail) -> StoreError {
    StoreError::InvalidData(format!(
        "chain {chain} cannot be extended past sequence {}",
        tail.sequence
    ))
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
