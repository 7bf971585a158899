//! LedgerStore trait: the abstract interface for audit event persistence.
//!
//! This trait allows the ledger to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use chronicle_core::{AuditEvent, ChainId, ChainKey, ChainTail, EventId};

use crate::error::Result;
use crate::query::{ChainCursor, ChainPage, EventFilter, Page, PageRequest, TimeRange};

/// Result of appending an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The event was stored and is now the chain's tail.
    Appended,

    /// An event with the same id is already stored (idempotent - not an error).
    Duplicate,

    /// The event was built against a tail that is no longer current.
    StaleTail {
        /// The chain's actual tail, `None` if the chain is empty.
        current: Option<ChainTail>,
    },
}

/// The LedgerStore trait: async, append-only event persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
///
/// # Design Notes
///
/// - **Append-only**: there is no update or delete operation.
/// - **Tail precondition**: `append` only succeeds if the event's sequence is
///   the chain's next slot and its `previous_hash` is the current tail's
///   integrity hash. Otherwise it returns `StaleTail` and stores nothing, so
///   two writers can never fork a chain.
/// - **Idempotent appends**: re-submitting an already-stored event id
///   returns `Duplicate`.
/// - **Atomic reads**: readers observe whole events, before or after an
///   append, never partially written ones.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Write Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a sealed event to its chain.
    ///
    /// # Returns
    /// - `Appended` if the event was new and extended the current tail.
    /// - `Duplicate` if an event with this id already exists.
    /// - `StaleTail` if the chain moved since the event was built.
    async fn append(&self, event: &AuditEvent) -> Result<AppendResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Chain Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// The most recent event on a chain.
    async fn latest(&self, chain: &ChainId) -> Result<Option<AuditEvent>>;

    /// Events of one chain in ascending `(timestamp, sequence)` order,
    /// restricted to `range`, starting after `cursor`, at most `limit`.
    async fn query_chain(
        &self,
        chain: &ChainId,
        range: TimeRange,
        cursor: ChainCursor,
        limit: u32,
    ) -> Result<ChainPage>;

    /// Number of events stored on a chain.
    async fn count_chain(&self, chain: &ChainId) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Organization Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an event by id.
    async fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>>;

    /// Filtered events of an organization, newest first.
    async fn query_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEvent>>;

    /// Every chain holding at least one event of the organization, sorted.
    async fn list_chains(&self, organization_id: &str) -> Result<Vec<ChainKey>>;
}

/// Convenience reads built on top of [`LedgerStore`].
pub trait LedgerStoreExt: LedgerStore {
    /// The tail position of a chain.
    fn tail(
        &self,
        chain: &ChainId,
    ) -> impl std::future::Future<Output = Result<Option<ChainTail>>> + Send;

    /// Every event of a chain in ascending order, fetched `page_size` at a
    /// time.
    fn load_chain(
        &self,
        chain: &ChainId,
        page_size: u32,
    ) -> impl std::future::Future<Output = Result<Vec<AuditEvent>>> + Send;
}

impl<S: LedgerStore + ?Sized> LedgerStoreExt for S {
    async fn tail(&self, chain: &ChainId) -> Result<Option<ChainTail>> {
        Ok(self.latest(chain).await?.map(|e| e.as_tail()))
    }

    async fn load_chain(&self, chain: &ChainId, page_size: u32) -> Result<Vec<AuditEvent>> {
        let mut events = Vec::new();
        let mut cursor = ChainCursor::Start;
        loop {
            let page = self
                .query_chain(chain, TimeRange::ALL, cursor, page_size)
                .await?;
            events.extend(page.events);
            match page.next {
                Some(next) if next != cursor => cursor = next,
                _ => return Ok(events),
            }
        }
    }
}
