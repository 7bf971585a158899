//! Suspendable verification state.
//!
//! A verification interrupted by cancellation or timeout hands back where it
//! stopped. The state is plain data, so callers may persist it and resume in
//! a later process.

use serde::{Deserialize, Serialize};

use chronicle_core::{ChainKey, ChainVerifier, VerificationReport, VerifierCheckpoint};
use chronicle_store::ChainCursor;

use crate::ledger::OrganizationReport;

/// Where a chain verification stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProgress {
    pub checkpoint: VerifierCheckpoint,

    /// The next page starts after this position.
    pub cursor: ChainCursor,

    /// Events read so far.
    pub scanned: u64,

    /// Chain length when the scan started; `None` until it has been counted.
    pub total: Option<u64>,
}

impl ChainProgress {
    /// Progress for a scan that has not read anything yet.
    pub fn start(chain: ChainKey) -> Self {
        Self {
            checkpoint: ChainVerifier::new(chain).checkpoint(),
            cursor: ChainCursor::Start,
            scanned: 0,
            total: None,
        }
    }

    pub fn chain(&self) -> &ChainKey {
        &self.checkpoint.chain
    }
}

/// Result of a chain verification that may be suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainVerification {
    Complete(VerificationReport),
    Suspended(ChainProgress),
}

/// Where an organization verification stopped.
///
/// The chain set is fixed when the verification starts; chains created
/// afterwards are not picked up on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationProgress {
    pub organization_id: String,

    /// Chains already concluded.
    pub completed: Vec<VerificationReport>,

    /// Chains still to scan, some partially.
    pub pending: Vec<ChainProgress>,
}

impl OrganizationProgress {
    pub(crate) fn start(organization_id: &str, chains: Vec<ChainKey>) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            completed: Vec::new(),
            pending: chains.into_iter().map(ChainProgress::start).collect(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of an organization verification that may be suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganizationVerification {
    Complete(OrganizationReport),
    Suspended(OrganizationProgress),
}

/// In-flight scan state, updated only between pages.
#[derive(Debug)]
pub(crate) struct ChainScan {
    pub verifier: ChainVerifier,
    pub cursor: ChainCursor,
    pub scanned: u64,
    pub total: Option<u64>,
}

impl ChainScan {
    pub fn new(chain: ChainKey) -> Self {
        Self::resume(ChainProgress::start(chain))
    }

    pub fn resume(progress: ChainProgress) -> Self {
        Self {
            verifier: ChainVerifier::resume(progress.checkpoint),
            cursor: progress.cursor,
            scanned: progress.scanned,
            total: progress.total,
        }
    }

    pub fn progress(&self) -> ChainProgress {
        ChainProgress {
            checkpoint: self.verifier.checkpoint(),
            cursor: self.cursor,
            scanned: self.scanned,
            total: self.total,
        }
    }

    pub fn finish(self) -> VerificationReport {
        let total = self.total.unwrap_or_default();
        self.verifier.finish(total)
    }
}
