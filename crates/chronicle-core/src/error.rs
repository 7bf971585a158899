//! Error types for Chronicle core.

use thiserror::Error;

/// Core errors raised by pure event and crypto operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("snapshot hash mismatch: expected {expected}, got {actual}")]
    SnapshotHashMismatch { expected: String, actual: String },

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Input validation failures, raised before any chain state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} exceeds maximum length of {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("field {0} contains control characters")]
    ControlCharacters(&'static str),

    #[error("event type {0} has no default severity; an explicit severity is required")]
    SeverityRequired(String),

    #[error("too many tags: {count} (maximum {max})")]
    TooManyTags { count: usize, max: usize },

    #[error("metadata must be a JSON object")]
    MetadataNotObject,

    #[error("chain tail at sequence {0} cannot be extended")]
    SequenceExhausted(u64),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
