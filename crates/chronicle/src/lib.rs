//! # Chronicle
//!
//! The unified API for the Chronicle audit ledger: tamper-evident records of
//! every privileged action, linked into per-request hash chains.
//!
//! ## Overview
//!
//! Chronicle provides:
//!
//! - **Append**: events are sealed with an integrity hash that covers the
//!   previous event's hash, so altering or removing any event breaks the chain
//! - **Verify**: any chain, or every chain of an organization, can be replayed
//!   and checked end to end
//! - **Query**: filtered, paginated search across an organization
//! - **Export**: JSON, CSV, or XML exports with per-chain attestations and an
//!   optional Ed25519 signature
//!
//! ## Key Concepts
//!
//! - **Chain**: all events sharing an organization, correlation id, and
//!   event type. Chains are independent of each other.
//! - **Fail closed**: if an event cannot be made durable the append returns an
//!   error and the caller must not proceed as if the action were audited.
//! - **Broken is data**: a chain that fails verification yields a report
//!   naming the first bad event, not an error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chronicle::{Ledger, LedgerConfig, NewEvent, RequestContext};
//! use chronicle::core::EventType;
//! use chronicle::store::SqliteStore;
//! use serde_json::json;
//!
//! async fn example() {
//!     let store = SqliteStore::open("audit.db").unwrap();
//!     let ledger = Ledger::new(store, LedgerConfig::default()).unwrap();
//!
//!     let ctx = RequestContext::new("org-1", "alice", "req-42");
//!     let event = ledger
//!         .append_event(
//!             &ctx,
//!             NewEvent::new(EventType::RoleChange, "promote", "member")
//!                 .resource_id("user-7")
//!                 .before(json!({"role": "viewer"}))
//!                 .after(json!({"role": "admin"})),
//!         )
//!         .await
//!         .unwrap();
//!
//!     let report = ledger.verify_chain(&event.chain_key()).await.unwrap();
//!     assert!(report.valid);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `chronicle::core` - Core primitives (AuditEvent, ChainKey, hashing, verification)
//! - `chronicle::store` - Storage abstraction, SQLite and in-memory stores

pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod ledger;
pub mod lock;
pub mod progress;
pub mod resolver;

// Re-export component crates
pub use chronicle_core as core;
pub use chronicle_store as store;

pub use config::{LedgerConfig, RetryPolicy};
pub use context::RequestContext;
pub use error::{LedgerError, Result};
pub use export::{
    ChainAttestation, ChainStatus, ExportBundle, ExportFormat, ExportOptions, ExportSignature,
};
pub use ledger::{Ledger, NewEvent, OrganizationReport};
pub use progress::{
    ChainProgress, ChainVerification, OrganizationProgress, OrganizationVerification,
};

// Re-export commonly used types
pub use chronicle_core::{
    AuditEvent, ChainBreak, ChainKey, EventId, EventType, Keypair, Severity, VerificationReport,
};
pub use chronicle_store::{EventCursor, EventFilter, Page, PageRequest, TimeRange};
pub use tokio_util::sync::CancellationToken;
