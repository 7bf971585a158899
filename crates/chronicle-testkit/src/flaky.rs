//! Fault injection for store-failure tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use chronicle::CancellationToken;
use chronicle_core::{AuditEvent, ChainId, ChainKey, EventId};
use chronicle_store::{
    AppendResult, ChainCursor, ChainPage, EventFilter, LedgerStore, Page, PageRequest, Result,
    StoreError, TimeRange,
};

/// A store wrapper that fails on command.
///
/// Counters are consumed one per call, so `fail_next_appends(2)` fails
/// exactly the next two appends.
#[derive(Debug, Default)]
pub struct FlakyStore<S> {
    inner: S,
    failing_appends: AtomicU32,
    lost_acks: AtomicU32,
    failing_reads: AtomicU32,
    read_delay_ms: AtomicU64,
    broken_writes: AtomicBool,
    append_calls: AtomicU32,
    chain_pages: AtomicU32,
    event_queries: AtomicU32,
    cancel_after: Mutex<Option<(u32, CancellationToken)>>,
    interleaved: Mutex<Option<(u32, AuditEvent)>>,
}

impl<S: LedgerStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_appends: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
            read_delay_ms: AtomicU64::new(0),
            broken_writes: AtomicBool::new(false),
            append_calls: AtomicU32::new(0),
            chain_pages: AtomicU32::new(0),
            event_queries: AtomicU32::new(0),
            cancel_after: Mutex::new(None),
            interleaved: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `n` appends with a transient error, storing nothing.
    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Store the next `n` appends but report a transient error, as if the
    /// acknowledgement was lost on the way back.
    pub fn lose_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Slow every read down by `delay`.
    pub fn delay_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every append fail permanently until cleared.
    pub fn break_writes(&self, broken: bool) {
        self.broken_writes.store(broken, Ordering::SeqCst);
    }

    /// Appends attempted so far, failed ones included.
    pub fn append_calls(&self) -> u32 {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Chain pages served so far.
    pub fn chain_pages(&self) -> u32 {
        self.chain_pages.load(Ordering::SeqCst)
    }

    /// Cancel `token` as the `n`th chain page from now is served. The page
    /// itself is still returned.
    pub fn cancel_after_chain_pages(&self, n: u32, token: CancellationToken) {
        if let Ok(mut slot) = self.cancel_after.lock() {
            *slot = Some((n, token));
        }
    }

    /// Append `event` to the inner store just before the `n`th organization
    /// query from now runs, as a concurrent writer would.
    pub fn append_before_event_query(&self, n: u32, event: AuditEvent) {
        self.event_queries.store(0, Ordering::SeqCst);
        if let Ok(mut slot) = self.interleaved.lock() {
            *slot = Some((n, event));
        }
    }

    fn served_chain_page(&self) {
        self.chain_pages.fetch_add(1, Ordering::SeqCst);
        let Ok(mut slot) = self.cancel_after.lock() else {
            return;
        };
        let due = match slot.as_mut() {
            Some((remaining, _)) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if let Some((_, token)) = due.then(|| slot.take()).flatten() {
            token.cancel();
        }
    }

    fn due_interleaved_event(&self) -> Option<AuditEvent> {
        let calls = self.event_queries.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.interleaved.lock().ok()?;
        if !matches!(slot.as_ref(), Some((n, _)) if *n == calls) {
            return None;
        }
        slot.take().map(|(_, event)| event)
    }

    async fn read<T>(&self, op: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if take(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read fault".into()));
        }
        op.await
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for FlakyStore<S> {
    async fn append(&self, event: &AuditEvent) -> Result<AppendResult> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_writes.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("injected permanent fault".into()));
        }
        if take(&self.failing_appends) {
            return Err(StoreError::Unavailable("injected write fault".into()));
        }
        let result = self.inner.append(event).await?;
        if take(&self.lost_acks) {
            return Err(StoreError::Unavailable("injected lost ack".into()));
        }
        Ok(result)
    }

    async fn latest(&self, chain: &ChainId) -> Result<Option<AuditEvent>> {
        self.read(self.inner.latest(chain)).await
    }

    async fn query_chain(
        &self,
        chain: &ChainId,
        range: TimeRange,
        cursor: ChainCursor,
        limit: u32,
    ) -> Result<ChainPage> {
        let page = self
            .read(self.inner.query_chain(chain, range, cursor, limit))
            .await?;
        self.served_chain_page();
        Ok(page)
    }

    async fn count_chain(&self, chain: &ChainId) -> Result<u64> {
        self.read(self.inner.count_chain(chain)).await
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>> {
        self.read(self.inner.get_event(id)).await
    }

    async fn query_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEvent>> {
        if let Some(event) = self.due_interleaved_event() {
            self.inner.append(&event).await?;
        }
        self.read(self.inner.query_events(organization_id, filter, page))
            .await
    }

    async fn list_chains(&self, organization_id: &str) -> Result<Vec<ChainKey>> {
        self.read(self.inner.list_chains(organization_id)).await
    }
}
