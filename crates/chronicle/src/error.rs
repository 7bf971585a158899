//! Error types for the Ledger.

use std::time::Duration;

use chronicle_core::{ChainKey, ValidationError};
use chronicle_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Ledger operations.
///
/// A broken chain is not an error: it is reported as data in a
/// [`VerificationReport`](chronicle_core::VerificationReport).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event was rejected before any chain state was touched.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The event could not be made durable. The triggering operation must
    /// not proceed as if it had been audited.
    #[error("ledger write failed on chain {chain}: {reason}")]
    LedgerWriteFailed { chain: ChainKey, reason: String },

    /// The store could not serve a read.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Other writers kept moving the chain's tail.
    #[error("chain {chain} still contended after {attempts} append attempts")]
    ChainContention { chain: ChainKey, attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("export failed: {0}")]
    Export(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::StoreUnavailable(e) => e.is_retryable(),
            LedgerError::ChainContention { .. } | LedgerError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Result type for Ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
