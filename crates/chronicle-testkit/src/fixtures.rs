//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use serde_json::json;

use chronicle::{Ledger, LedgerConfig, NewEvent, RequestContext};
use chronicle_core::{now_millis, AuditEvent, ChainKey, EventBuilder, EventType};
use chronicle_store::{AppendResult, LedgerStore, MemoryStore};

/// A ledger over a shared memory store, with the store reachable for
/// tampering and out-of-band writes.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
    pub ledger: Ledger<MemoryStore>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::from_arc(store.clone(), config).expect("valid test config");
        Self { store, ledger }
    }

    /// A user context in `org-1`.
    pub fn ctx(&self, user: &str, request: &str) -> RequestContext {
        RequestContext::new("org-1", user, request)
    }

    /// Append `count` data modifications to one chain, each with a distinct
    /// after-state.
    pub async fn append_many(&self, ctx: &RequestContext, count: usize) -> Vec<AuditEvent> {
        let mut events = Vec::with_capacity(count);
        for i in 0..count {
            let event = self
                .ledger
                .append_event(
                    ctx,
                    NewEvent::new(EventType::DataModification, "edit", "document")
                        .resource_id("doc-1")
                        .before(json!({ "rev": i }))
                        .after(json!({ "rev": i + 1 })),
                )
                .await
                .expect("append");
            events.push(event);
        }
        events
    }

    /// Append an event straight to the store, as another process sharing it
    /// would. The ledger's cached tail is not told.
    pub async fn foreign_append(&self, key: &ChainKey) -> AuditEvent {
        let tail = self
            .store
            .latest(&key.id())
            .await
            .expect("store read")
            .map(|e| e.as_tail());
        let event = EventBuilder::new(key.clone(), "foreign-req", "sync", "replica")
            .timestamp(now_millis())
            .follows(tail.as_ref())
            .seal()
            .expect("valid foreign event");
        let result = self.store.append(&event).await.expect("store write");
        assert_eq!(result, AppendResult::Appended);
        event
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
