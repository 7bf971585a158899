//! # Chronicle Store
//!
//! Storage abstraction for the Chronicle audit ledger. Provides a trait-based
//! interface for append-only event persistence with SQLite and in-memory
//! implementations.
//!
//! ## Overview
//!
//! The store abstracts event storage behind the [`LedgerStore`] trait,
//! allowing the ledger to be storage-agnostic. The primary implementation
//! is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`LedgerStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AppendResult`] - Result of appending an event
//! - [`EventFilter`] / [`PageRequest`] - Organization-wide queries
//! - [`ChainCursor`] / [`ChainPage`] - Resumable chain scans
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chronicle_store::{AppendResult, LedgerStore, SqliteStore};
//! use chronicle_core::{ChainKey, EventBuilder, EventType};
//!
//! async fn example() {
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!
//!     let chain = ChainKey::new("org-1", "req-1", EventType::DataAccess);
//!     let tail = store.latest(&chain.id()).await.unwrap().map(|e| e.as_tail());
//!     let event = EventBuilder::new(chain, "req-1", "read", "report")
//!         .follows(tail.as_ref())
//!         .seal()
//!         .unwrap();
//!
//!     assert_eq!(store.append(&event).await.unwrap(), AppendResult::Appended);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only**: no update or delete paths; SQLite enforces this with triggers
//! - **Tail precondition**: an append built against a stale tail returns `StaleTail`
//! - **Idempotent appends**: re-appending the same event id returns `Duplicate`

pub mod error;
pub mod memory;
pub mod migration;
pub mod query;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use query::{
    ChainCursor, ChainPage, EventCursor, EventFilter, Page, PageRequest, TimeRange,
};
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, LedgerStore, LedgerStoreExt};
