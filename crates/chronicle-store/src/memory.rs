//! In-memory implementation of the LedgerStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use chronicle_core::{AuditEvent, ChainId, ChainKey, EventId};

use crate::error::{exhausted, Result, StoreError};
use crate::query::{newest_first, ChainCursor, ChainPage, EventFilter, Page, PageRequest, TimeRange};
use crate::traits::{AppendResult, LedgerStore};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Events indexed by id.
    events: HashMap<EventId, AuditEvent>,

    /// Chain membership in append order.
    chains: HashMap<ChainId, StoredChain>,
}

struct StoredChain {
    key: ChainKey,
    events: Vec<EventId>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Total number of stored events across all chains.
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(StoreError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(StoreError::poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn chain_events<'a>(&'a self, chain: &ChainId) -> impl Iterator<Item = &'a AuditEvent> + 'a {
        self.chains
            .get(chain)
            .into_iter()
            .flat_map(|c| c.events.iter())
            .filter_map(|id| self.events.get(id))
    }

    fn latest(&self, chain: &ChainId) -> Option<&AuditEvent> {
        self.chain_events(chain).max_by_key(|e| (e.timestamp, e.sequence))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, event: &AuditEvent) -> Result<AppendResult> {
        let mut inner = self.write()?;

        if inner.events.contains_key(&event.id) {
            return Ok(AppendResult::Duplicate);
        }

        let key = event.chain_key();
        let chain_id = key.id();
        let current = inner.latest(&chain_id).map(|e| e.as_tail());

        let expected_sequence = match current {
            Some(tail) => tail.next_sequence().ok_or_else(|| exhausted(&key, &tail))?,
            None => 0,
        };
        let expected_previous = current.map(|t| t.integrity_hash);
        if event.sequence != expected_sequence || event.previous_hash != expected_previous {
            return Ok(AppendResult::StaleTail { current });
        }

        inner.events.insert(event.id, event.clone());
        inner
            .chains
            .entry(chain_id)
            .or_insert_with(|| StoredChain {
                key,
                events: Vec::new(),
            })
            .events
            .push(event.id);

        Ok(AppendResult::Appended)
    }

    async fn latest(&self, chain: &ChainId) -> Result<Option<AuditEvent>> {
        let inner = self.read()?;
        Ok(inner.latest(chain).cloned())
    }

    async fn query_chain(
        &self,
        chain: &ChainId,
        range: TimeRange,
        cursor: ChainCursor,
        limit: u32,
    ) -> Result<ChainPage> {
        let inner = self.read()?;
        let Some(first) = cursor.first_sequence() else {
            return Ok(ChainPage::from_events(Vec::new(), limit));
        };

        let mut events: Vec<AuditEvent> = inner
            .chain_events(chain)
            .filter(|e| e.sequence >= first && range.contains(e.timestamp))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.timestamp, e.sequence));
        events.truncate(limit as usize);

        Ok(ChainPage::from_events(events, limit))
    }

    async fn count_chain(&self, chain: &ChainId) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner.chain_events(chain).count() as u64)
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>> {
        let inner = self.read()?;
        Ok(inner.events.get(id).cloned())
    }

    async fn query_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEvent>> {
        let inner = self.read()?;

        let mut matching: Vec<&AuditEvent> = inner
            .events
            .values()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let limit = page.effective_limit();
        let items = matching
            .iter()
            .skip(page.offset as usize)
            .take(limit as usize)
            .map(|e| (*e).clone())
            .collect();

        Ok(Page {
            items,
            total: matching.len() as u64,
            offset: page.offset,
            limit,
        })
    }

    async fn list_chains(&self, organization_id: &str) -> Result<Vec<ChainKey>> {
        let inner = self.read()?;
        let keys: BTreeMap<&ChainKey, ()> = inner
            .chains
            .values()
            .filter(|c| c.key.organization_id == organization_id && !c.events.is_empty())
            .map(|c| (&c.key, ()))
            .collect();
        Ok(keys.into_keys().cloned().collect())
    }
}

/// Direct mutation of stored events, for exercising tamper detection.
#[cfg(any(test, feature = "test-util"))]
impl MemoryStore {
    /// Mutate a stored event in place, bypassing every ledger check.
    ///
    /// Returns `false` if no event has this id.
    pub fn tamper(&self, id: &EventId, f: impl FnOnce(&mut AuditEvent)) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        match inner.events.get_mut(id) {
            Some(event) => {
                f(event);
                true
            }
            None => false,
        }
    }

    /// Remove a stored event, bypassing the append-only contract.
    pub fn purge(&self, id: &EventId) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        if inner.events.remove(id).is_none() {
            return false;
        }
        for chain in inner.chains.values_mut() {
            chain.events.retain(|e| e != id);
        }
        true
    }
}
