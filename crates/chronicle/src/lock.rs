//! Per-chain write serialization.
//!
//! Appends to the same chain must observe and extend the tail one at a
//! time; appends to different chains never wait for each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use chronicle_core::ChainId;

/// Keyed async mutexes, one per chain with a writer in flight.
///
/// Entries are created on demand and removed when the last holder or
/// waiter goes away, so the map only holds chains being written right now.
#[derive(Debug, Default)]
pub struct ChainLocks {
    locks: DashMap<ChainId, Arc<Mutex<()>>>,
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to a chain.
    pub async fn lock(&self, chain: ChainId) -> ChainGuard<'_> {
        let mutex = self
            .locks
            .entry(chain)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        ChainGuard {
            locks: self,
            chain,
            guard: Some(guard),
        }
    }

    /// Number of chains with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive write access to one chain. Released on drop.
#[derive(Debug)]
pub struct ChainGuard<'a> {
    locks: &'a ChainLocks,
    chain: ChainId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ChainGuard<'_> {
    pub fn chain(&self) -> &ChainId {
        &self.chain
    }
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.locks
            .locks
            .remove_if(&self.chain, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
