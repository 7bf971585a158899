//! # Chronicle Core
//!
//! Pure primitives for the Chronicle audit ledger: events, chains,
//! canonicalization, integrity hashing, and chain verification.
//!
//! This crate contains no I/O, no storage, no async. It is pure computation
//! over hash-linked event records.
//!
//! ## Key Types
//!
//! - [`AuditEvent`] - An immutable record of one privileged action
//! - [`EventBuilder`] - Assembles, positions, and seals an event
//! - [`ChainKey`] / [`ChainId`] - Identity of an independent hash chain
//! - [`ChainVerifier`] - Incremental, resumable chain replay
//! - [`Snapshot`] - Canonical before/after state with its hash
//!
//! ## Hashing
//!
//! Payload snapshots are canonical JSON hashed with SHA-256 (see
//! [`canonical`]). Each event's integrity hash covers its fields and the
//! previous event's integrity hash (see [`integrity`]), which is what makes
//! a chain tamper-evident.

pub mod canonical;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod event;
pub mod integrity;
pub mod types;
pub mod validation;
pub mod verify;

pub use canonical::{canonical_json, hash_payload, Snapshot};
pub use chain::{ChainId, ChainKey, ChainTail};
pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, Sha256Hash};
pub use error::{CoreError, ValidationError};
pub use event::{AuditEvent, EventBuilder, EventType, Severity, SYSTEM_ACTOR};
pub use integrity::integrity_hash;
pub use types::{format_millis, now_millis, parse_millis, EventId};
pub use validation::validate_event;
pub use verify::{
    verify_events, BreakKind, ChainBreak, ChainVerifier, SnapshotSide, VerificationReport,
    VerifierCheckpoint,
};
