//! Tail resolution with a bounded in-memory cache.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use chronicle_core::{ChainId, ChainTail};
use chronicle_store::{LedgerStore, LedgerStoreExt};

use crate::config::RetryPolicy;
use crate::error::Result;

/// Resolves the current tail of a chain: cache first, then the store.
///
/// Mutating methods must only be called while holding the chain's lock.
/// A store failure is always an error, never "the chain is empty": treating
/// it as absent would start a second genesis event on an existing chain.
#[derive(Debug)]
pub struct PreviousHashResolver<S: LedgerStore> {
    store: Arc<S>,
    cache: DashMap<ChainId, ChainTail>,
    capacity: usize,
    retry: RetryPolicy,
}

impl<S: LedgerStore> PreviousHashResolver<S> {
    /// A resolver caching at most `capacity` tails. Zero disables caching.
    pub fn new(store: Arc<S>, capacity: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            capacity,
            retry,
        }
    }

    /// The chain's current tail, or `None` if it has no events.
    pub async fn resolve(&self, chain: &ChainId) -> Result<Option<ChainTail>> {
        if let Some(tail) = self.cache.get(chain) {
            debug!(chain = %chain, sequence = tail.sequence, "tail cache hit");
            return Ok(Some(*tail));
        }

        let tail = self
            .retry
            .run("latest", || self.store.tail(chain))
            .await?;
        debug!(chain = %chain, sequence = ?tail.map(|t| t.sequence), "tail read from store");

        if let Some(tail) = tail {
            self.record(*chain, tail);
        }
        Ok(tail)
    }

    /// Remember a chain's new tail.
    pub fn record(&self, chain: ChainId, tail: ChainTail) {
        if self.capacity == 0 {
            return;
        }
        if self.cache.len() >= self.capacity && !self.cache.contains_key(&chain) {
            // Any slot will do; a miss just re-reads the store.
            let victim = self.cache.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.cache.remove(&victim);
                debug!(chain = %victim, "tail cache eviction");
            }
        }
        self.cache.insert(chain, tail);
    }

    /// Forget a chain's tail so the next resolve reads the store.
    pub fn invalidate(&self, chain: &ChainId) {
        if self.cache.remove(chain).is_some() {
            debug!(chain = %chain, "tail cache invalidated");
        }
    }

    /// Number of cached tails.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
