//! The Ledger: unified API for the audit ledger.
//!
//! The Ledger brings together the store, per-chain locking, tail
//! resolution, verification, and export into one interface.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chronicle_core::{
    now_millis, AuditEvent, ChainKey, Ed25519PublicKey, EventBuilder, EventId, EventType, Keypair,
    Severity, ValidationError, VerificationReport,
};
use chronicle_store::{
    AppendResult, EventCursor, EventFilter, LedgerStore, LedgerStoreExt, Page, PageRequest,
    StoreError, TimeRange,
};

use crate::config::LedgerConfig;
use crate::context::RequestContext;
use crate::error::{LedgerError, Result};
use crate::export::{build_bundle, ChainAttestation, ExportBundle, ExportOptions};
use crate::lock::ChainLocks;
use crate::progress::{
    ChainProgress, ChainScan, ChainVerification, OrganizationProgress, OrganizationVerification,
};
use crate::resolver::PreviousHashResolver;

/// The caller-supplied half of an audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: EventType,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,

    /// Resource state before the action.
    pub before: Option<Value>,

    /// Resource state after the action.
    pub after: Option<Value>,

    /// Free-form context, a JSON object. Not covered by the integrity hash.
    pub metadata: Option<Value>,

    pub tags: Vec<String>,

    /// Overrides the event type's default severity.
    pub severity: Option<Severity>,
}

impl NewEvent {
    pub fn new(event_type: EventType, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            event_type,
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            resource_type: None,
            before: None,
            after: None,
            metadata: None,
            tags: Vec::new(),
            severity: None,
        }
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn before(mut self, state: Value) -> Self {
        self.before = Some(state);
        self
    }

    pub fn after(mut self, state: Value) -> Self {
        self.after = Some(state);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Outcome of verifying every chain of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationReport {
    pub organization_id: String,

    /// One report per chain, sorted by chain key.
    pub chains: Vec<VerificationReport>,

    pub valid: bool,
    pub total_events: u64,
    pub verified_events: u64,
}

impl OrganizationReport {
    fn new(organization_id: &str, chains: Vec<VerificationReport>) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            valid: chains.iter().all(|r| r.valid),
            total_events: chains.iter().map(|r| r.total_count).sum(),
            verified_events: chains.iter().map(|r| r.verified_count).sum(),
            chains,
        }
    }

    pub fn broken_chains(&self) -> impl Iterator<Item = &VerificationReport> {
        self.chains.iter().filter(|r| !r.valid)
    }
}

/// The main Ledger struct.
///
/// Provides a unified API for:
/// - Appending audit events to their chains
/// - Verifying one chain or a whole organization
/// - Querying events
/// - Producing attested, optionally signed exports
pub struct Ledger<S: LedgerStore> {
    store: Arc<S>,
    config: LedgerConfig,
    locks: ChainLocks,
    resolver: PreviousHashResolver<S>,
    /// Signs export digests when present.
    export_key: Option<Keypair>,
}

impl<S: LedgerStore> Ledger<S> {
    /// Create a ledger over a store.
    pub fn new(store: S, config: LedgerConfig) -> Result<Self> {
        Self::from_arc(Arc::new(store), config)
    }

    /// Create a ledger over a shared store.
    pub fn from_arc(store: Arc<S>, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let resolver =
            PreviousHashResolver::new(store.clone(), config.cache_capacity, config.retry.clone());
        Ok(Self {
            store,
            config,
            locks: ChainLocks::new(),
            resolver,
            export_key: None,
        })
    }

    /// Sign every export with this key.
    pub fn with_signing_key(mut self, key: Keypair) -> Self {
        self.export_key = Some(key);
        self
    }

    /// The key exports are signed with, if any.
    pub fn export_public_key(&self) -> Option<Ed25519PublicKey> {
        self.export_key.as_ref().map(Keypair::public_key)
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an event and link it into its chain.
    ///
    /// Returns only once the event is durable. Any failure is returned to the
    /// caller, which must not proceed as if the action had been audited.
    pub async fn append_event(&self, ctx: &RequestContext, event: NewEvent) -> Result<AuditEvent> {
        let key = ctx.chain_key(event.event_type);
        let builder = Self::builder(ctx, key.clone(), event);
        builder.validate()?;

        let chain = key.id();
        let _guard = self.locks.lock(chain).await;
        let mut tail = self.resolver.resolve(&chain).await?;

        let attempts = self.config.max_append_attempts;
        for attempt in 1..=attempts {
            let sealed = builder
                .clone()
                .timestamp(now_millis())
                .follows(tail.as_ref())
                .seal();
            let event = match sealed {
                Ok(event) => event,
                Err(ValidationError::SequenceExhausted(sequence)) => {
                    self.resolver.invalidate(&chain);
                    let reason = StoreError::InvalidData(format!(
                        "chain tail at sequence {sequence} cannot be extended"
                    ));
                    error!(chain = %key, error = %reason, "audit event write failed");
                    return Err(LedgerError::LedgerWriteFailed {
                        chain: key,
                        reason: reason.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };

            let written = self
                .config
                .retry
                .run("append", || self.store.append(&event))
                .await;

            match written {
                Ok(AppendResult::Appended) | Ok(AppendResult::Duplicate) => {
                    self.resolver.record(chain, event.as_tail());
                    info!(
                        chain = %key,
                        event_id = %event.id,
                        sequence = event.sequence,
                        severity = %event.severity,
                        "audit event appended"
                    );
                    return Ok(event);
                }
                Ok(AppendResult::StaleTail { current }) => {
                    warn!(chain = %key, attempt, "chain tail moved, rebuilding event");
                    match current {
                        Some(current) => self.resolver.record(chain, current),
                        None => self.resolver.invalidate(&chain),
                    }
                    tail = current;
                }
                Err(e) => {
                    self.resolver.invalidate(&chain);
                    error!(chain = %key, error = %e, "audit event write failed");
                    return Err(LedgerError::LedgerWriteFailed {
                        chain: key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.resolver.invalidate(&chain);
        warn!(chain = %key, attempts, "giving up on contended chain");
        Err(LedgerError::ChainContention {
            chain: key,
            attempts,
        })
    }

    fn builder(ctx: &RequestContext, key: ChainKey, event: NewEvent) -> EventBuilder {
        EventBuilder::new(key, ctx.request_id.clone(), event.action, event.resource)
            .user(ctx.user_id.clone())
            .session(ctx.session_id.clone())
            .client(ctx.ip_address.clone(), ctx.user_agent.clone())
            .resource_id(event.resource_id)
            .resource_type(event.resource_type)
            .before(event.before.as_ref())
            .after(event.after.as_ref())
            .severity(event.severity)
            .tags(event.tags)
            .metadata(
                event
                    .metadata
                    .unwrap_or_else(|| Value::Object(Default::default())),
            )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify one chain from its first event to its tail.
    pub async fn verify_chain(&self, key: &ChainKey) -> Result<VerificationReport> {
        self.verify_chain_with(key, &CancellationToken::new()).await
    }

    /// Verify one chain, stopping with an error if `cancel` fires or the
    /// configured timeout elapses. A partial scan is never reported.
    pub async fn verify_chain_with(
        &self,
        key: &ChainKey,
        cancel: &CancellationToken,
    ) -> Result<VerificationReport> {
        let report = self
            .with_timeout(self.scan_chain(key.clone(), cancel))
            .await?;
        log_report(&report);
        Ok(report)
    }

    /// Verify every chain of an organization, several at a time.
    pub async fn verify_organization(
        &self,
        organization_id: &str,
        cancel: &CancellationToken,
    ) -> Result<OrganizationReport> {
        let reports = self
            .with_timeout(async {
                let chains = self
                    .read("list_chains", || self.store.list_chains(organization_id))
                    .await?;
                self.verify_many(chains, cancel).await
            })
            .await?;

        reports.iter().for_each(log_report);
        let report = OrganizationReport::new(organization_id, reports);
        info!(
            organization_id,
            chains = report.chains.len(),
            valid = report.valid,
            events = report.total_events,
            "organization verified"
        );
        Ok(report)
    }

    async fn verify_many(
        &self,
        chains: Vec<ChainKey>,
        cancel: &CancellationToken,
    ) -> Result<Vec<VerificationReport>> {
        let mut reports: Vec<VerificationReport> = stream::iter(chains)
            .map(|key| self.scan_chain(key, cancel))
            .buffer_unordered(self.config.verify_concurrency)
            .try_collect()
            .await?;
        reports.sort_by(|a, b| a.chain.cmp(&b.chain));
        Ok(reports)
    }

    async fn scan_chain(
        &self,
        key: ChainKey,
        cancel: &CancellationToken,
    ) -> Result<VerificationReport> {
        let mut scan = ChainScan::new(key);
        self.advance(&mut scan, cancel).await?;
        Ok(scan.finish())
    }

    /// Page through a chain, feeding the verifier, up to the event count
    /// observed when the scan started.
    ///
    /// `scan` only changes once a page has been read in full, so a scan
    /// dropped at any await point can be resumed from it.
    async fn advance(&self, scan: &mut ChainScan, cancel: &CancellationToken) -> Result<()> {
        let chain = scan.verifier.chain().id();
        let total = match scan.total {
            Some(total) => total,
            None => {
                let total =
                    cancellable(cancel, self.read("count_chain", || self.store.count_chain(&chain)))
                        .await?;
                scan.total = Some(total);
                total
            }
        };

        while scan.scanned < total && !scan.verifier.is_broken() {
            let limit = (total - scan.scanned).min(u64::from(self.config.page_size)) as u32;
            let cursor = scan.cursor;
            let page = cancellable(
                cancel,
                self.read("query_chain", || {
                    self.store.query_chain(&chain, TimeRange::ALL, cursor, limit)
                }),
            )
            .await?;

            scan.scanned += page.events.len() as u64;
            for event in &page.events {
                if !scan.verifier.feed(event) {
                    break;
                }
            }
            match page.next {
                Some(next) => scan.cursor = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Verify one chain, handing back the progress made if `cancel` fires or
    /// the configured timeout elapses.
    ///
    /// Start with [`ChainProgress::start`]; pass a returned
    /// [`ChainVerification::Suspended`] progress back in to continue.
    pub async fn verify_chain_resumable(
        &self,
        progress: ChainProgress,
        cancel: &CancellationToken,
    ) -> Result<ChainVerification> {
        let mut scan = ChainScan::resume(progress);
        let limit = self.config.verify_timeout();
        let interrupted = tokio::time::timeout(limit, self.advance(&mut scan, cancel)).await;

        match suspension(interrupted, limit)? {
            None => {
                let report = scan.finish();
                log_report(&report);
                Ok(ChainVerification::Complete(report))
            }
            Some(reason) => {
                let progress = scan.progress();
                info!(
                    chain = %progress.chain(),
                    scanned = progress.scanned,
                    reason = %reason,
                    "chain verification suspended"
                );
                Ok(ChainVerification::Suspended(progress))
            }
        }
    }

    /// The starting point for [`Ledger::verify_organization_resumable`],
    /// covering every chain the organization has now.
    pub async fn organization_progress(&self, organization_id: &str) -> Result<OrganizationProgress> {
        let chains = self.list_chains(organization_id).await?;
        Ok(OrganizationProgress::start(organization_id, chains))
    }

    /// Verify the pending chains of an organization, several at a time,
    /// handing back the progress made if `cancel` fires or the configured
    /// timeout elapses.
    ///
    /// A store failure fails the call; retry it with the progress passed in.
    pub async fn verify_organization_resumable(
        &self,
        mut progress: OrganizationProgress,
        cancel: &CancellationToken,
    ) -> Result<OrganizationVerification> {
        let limit = self.config.verify_timeout();
        let deadline = tokio::time::Instant::now() + limit;

        let pending = std::mem::take(&mut progress.pending);
        let scans: Vec<(ChainScan, Result<Option<LedgerError>>)> = stream::iter(pending)
            .map(|chain| async move {
                let mut scan = ChainScan::resume(chain);
                let outcome = tokio::time::timeout_at(deadline, self.advance(&mut scan, cancel)).await;
                let outcome = suspension(outcome, limit);
                (scan, outcome)
            })
            .buffer_unordered(self.config.verify_concurrency)
            .collect()
            .await;

        for (scan, outcome) in scans {
            match outcome? {
                None => {
                    let report = scan.finish();
                    log_report(&report);
                    progress.completed.push(report);
                }
                Some(_) => progress.pending.push(scan.progress()),
            }
        }

        if !progress.is_done() {
            progress.pending.sort_by(|a, b| a.chain().cmp(b.chain()));
            info!(
                organization_id = %progress.organization_id,
                completed = progress.completed.len(),
                pending = progress.pending.len(),
                "organization verification suspended"
            );
            return Ok(OrganizationVerification::Suspended(progress));
        }

        progress.completed.sort_by(|a, b| a.chain.cmp(&b.chain));
        let report = OrganizationReport::new(&progress.organization_id, progress.completed);
        info!(
            organization_id = %report.organization_id,
            chains = report.chains.len(),
            valid = report.valid,
            events = report.total_events,
            "organization verified"
        );
        Ok(OrganizationVerification::Complete(report))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Filtered events of an organization, newest first.
    pub async fn query_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        page: PageRequest,
    ) -> Result<Page<AuditEvent>> {
        self.read("query_events", || {
            self.store.query_events(organization_id, filter, page)
        })
        .await
    }

    pub async fn get_event(&self, id: &EventId) -> Result<Option<AuditEvent>> {
        self.read("get_event", || self.store.get_event(id)).await
    }

    /// Every chain of an organization, sorted.
    pub async fn list_chains(&self, organization_id: &str) -> Result<Vec<ChainKey>> {
        self.read("list_chains", || self.store.list_chains(organization_id))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    /// Export every event of an organization matching `filter`.
    ///
    /// Pages resume from the last event read, so events appended while the
    /// export runs are either wholly included or left out.
    pub async fn export_events(
        &self,
        organization_id: &str,
        filter: &EventFilter,
        options: &ExportOptions,
    ) -> Result<ExportBundle> {
        self.with_timeout(async {
            let mut events = Vec::new();
            let mut filter = filter.clone();
            loop {
                let page = PageRequest::first(PageRequest::MAX_LIMIT);
                let result = self.query_events(organization_id, &filter, page).await?;
                let more = result.has_more();
                match result.items.last() {
                    Some(last) => filter.before = Some(EventCursor::at(last)),
                    None => break,
                }
                events.extend(result.items);
                if !more {
                    break;
                }
            }
            self.export(events, options).await
        })
        .await
    }

    /// Export one whole chain.
    pub async fn export_chain(&self, key: &ChainKey, options: &ExportOptions) -> Result<ExportBundle> {
        let chain = key.id();
        let page_size = self.config.page_size;
        self.with_timeout(async {
            let events = self
                .read("load_chain", || self.store.load_chain(&chain, page_size))
                .await?;
            self.export(events, options).await
        })
        .await
    }

    async fn export(&self, mut events: Vec<AuditEvent>, options: &ExportOptions) -> Result<ExportBundle> {
        events.sort_by_cached_key(|e| (e.chain_key(), e.sequence));

        let mut exported: BTreeMap<ChainKey, u64> = BTreeMap::new();
        for event in &events {
            *exported.entry(event.chain_key()).or_default() += 1;
        }

        let chains = if options.verify_chains {
            let keys = exported.keys().cloned().collect();
            self.verify_many(keys, &CancellationToken::new())
                .await?
                .into_iter()
                .map(|report| {
                    let count = exported.get(&report.chain).copied().unwrap_or_default();
                    ChainAttestation::from_report(report, count)
                })
                .collect()
        } else {
            let mut chains = Vec::with_capacity(exported.len());
            for (key, count) in &exported {
                let chain = key.id();
                let total = self
                    .read("count_chain", || self.store.count_chain(&chain))
                    .await?;
                chains.push(ChainAttestation::unverified(key.clone(), *count, total));
            }
            chains
        };

        let bundle = build_bundle(
            &events,
            chains,
            options,
            now_millis(),
            self.export_key.as_ref(),
        )?;
        info!(
            format = %bundle.format,
            events = bundle.event_count,
            chains = bundle.chains.len(),
            signed = bundle.signature.is_some(),
            digest = %bundle.digest,
            "export produced"
        );
        Ok(bundle)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// A store read, retried on transient failures.
    async fn read<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = chronicle_store::Result<T>>,
    {
        Ok(self.config.retry.run(op, f).await?)
    }

    async fn with_timeout<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.verify_timeout();
        tokio::time::timeout(limit, work)
            .await
            .map_err(|_| LedgerError::Timeout(limit))?
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LedgerError::Cancelled),
        result = work => result,
    }
}

/// Sort the end of a bounded scan: `None` if it ran to completion, the
/// interruption if it was cancelled or timed out, and any other failure as
/// an error.
fn suspension(
    outcome: std::result::Result<Result<()>, tokio::time::error::Elapsed>,
    limit: std::time::Duration,
) -> Result<Option<LedgerError>> {
    match outcome {
        Ok(Ok(())) => Ok(None),
        Ok(Err(LedgerError::Cancelled)) => Ok(Some(LedgerError::Cancelled)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(Some(LedgerError::Timeout(limit))),
    }
}

fn log_report(report: &VerificationReport) {
    match &report.broken_at {
        None => info!(
            chain = %report.chain,
            events = report.verified_count,
            "chain verified"
        ),
        Some(brk) => warn!(
            chain = %report.chain,
            index = brk.index,
            event_id = ?brk.event_id,
            reason = %brk.kind,
            "chain broken"
        ),
    }
}
