//! Chain verification.
//!
//! [`ChainVerifier`] replays a chain in ascending order and proves that no
//! event was altered, removed from the middle, or reordered. It is an
//! incremental state machine: events are fed one at a time, so a caller can
//! page through a chain of any length, and a [`VerifierCheckpoint`] lets a
//! scan be suspended and resumed later.
//!
//! Each event is checked, in order, for:
//! 1. membership in the chain being verified
//! 2. sequence continuity
//! 3. linkage: `previous_hash` equals the prior event's integrity hash
//! 4. non-decreasing timestamps
//! 5. snapshot self-consistency (stored text hashes to the stored hash)
//! 6. the recomputed integrity hash equals the stored one
//!
//! The first failure moves the verifier to the broken state; later events
//! are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::{ChainId, ChainKey};
use crate::crypto::Sha256Hash;
use crate::event::AuditEvent;
use crate::integrity::integrity_hash;
use crate::types::EventId;

/// Which snapshot of an event failed its self-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSide {
    Before,
    After,
}

/// Why a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakKind {
    /// The event belongs to a different chain.
    ForeignEvent,

    /// The event's sequence number is not the next one.
    SequenceGap { expected: u64, found: u64 },

    /// `previous_hash` does not match the prior event's integrity hash.
    PreviousHashMismatch {
        expected: Option<Sha256Hash>,
        found: Option<Sha256Hash>,
    },

    /// The event is timestamped earlier than its predecessor.
    TimestampRegression { previous: i64, found: i64 },

    /// A stored snapshot does not hash to its stored hash.
    SnapshotMismatch { side: SnapshotSide },

    /// The recomputed integrity hash differs from the stored one.
    IntegrityMismatch {
        stored: Sha256Hash,
        computed: Sha256Hash,
    },

    /// The scan saw fewer events than the chain is known to hold.
    MissingEvents { expected: u64, found: u64 },
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakKind::ForeignEvent => write!(f, "event belongs to another chain"),
            BreakKind::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {expected}, found {found}")
            }
            BreakKind::PreviousHashMismatch { .. } => write!(f, "previous hash mismatch"),
            BreakKind::TimestampRegression { previous, found } => {
                write!(f, "timestamp {found} precedes previous {previous}")
            }
            BreakKind::SnapshotMismatch { side } => write!(f, "{side:?} snapshot altered"),
            BreakKind::IntegrityMismatch { .. } => write!(f, "integrity hash mismatch"),
            BreakKind::MissingEvents { expected, found } => {
                write!(f, "expected {expected} events, scanned {found}")
            }
        }
    }
}

/// The first point at which a chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position in the scan.
    pub index: u64,

    /// The offending event, when there is one.
    pub event_id: Option<EventId>,

    pub kind: BreakKind,
}

/// Outcome of verifying one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub chain: ChainKey,
    pub valid: bool,
    pub verified_count: u64,
    pub total_count: u64,
    pub broken_at: Option<ChainBreak>,
}

impl VerificationReport {
    /// Report for a chain with no events.
    pub fn empty(chain: ChainKey) -> Self {
        Self {
            chain,
            valid: true,
            verified_count: 0,
            total_count: 0,
            broken_at: None,
        }
    }
}

/// Serializable verifier state, for resuming a suspended scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierCheckpoint {
    pub chain: ChainKey,
    pub verified_count: u64,
    pub expected_previous: Option<Sha256Hash>,
    pub last_timestamp: Option<i64>,
    pub broken_at: Option<ChainBreak>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Start,
    Verifying {
        expected_previous: Sha256Hash,
        last_timestamp: i64,
    },
    Broken(ChainBreak),
}

/// Incremental chain verifier.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    chain: ChainKey,
    chain_id: ChainId,
    verified: u64,
    state: State,
}

impl ChainVerifier {
    /// Start verifying a chain from its first event.
    pub fn new(chain: ChainKey) -> Self {
        let chain_id = chain.id();
        Self {
            chain,
            chain_id,
            verified: 0,
            state: State::Start,
        }
    }

    /// Resume a scan from a checkpoint.
    pub fn resume(checkpoint: VerifierCheckpoint) -> Self {
        let chain_id = checkpoint.chain.id();
        let state = match (checkpoint.broken_at, checkpoint.expected_previous) {
            (Some(brk), _) => State::Broken(brk),
            (None, Some(prev)) => State::Verifying {
                expected_previous: prev,
                last_timestamp: checkpoint.last_timestamp.unwrap_or(i64::MIN),
            },
            (None, None) => State::Start,
        };
        Self {
            chain: checkpoint.chain,
            chain_id,
            verified: checkpoint.verified_count,
            state,
        }
    }

    /// Capture the current state.
    pub fn checkpoint(&self) -> VerifierCheckpoint {
        let (expected_previous, last_timestamp, broken_at) = match &self.state {
            State::Start => (None, None, None),
            State::Verifying {
                expected_previous,
                last_timestamp,
            } => (Some(*expected_previous), Some(*last_timestamp), None),
            State::Broken(brk) => (None, None, Some(brk.clone())),
        };
        VerifierCheckpoint {
            chain: self.chain.clone(),
            verified_count: self.verified,
            expected_previous,
            last_timestamp,
            broken_at,
        }
    }

    /// The chain being verified.
    pub fn chain(&self) -> &ChainKey {
        &self.chain
    }

    /// Number of events verified so far.
    pub fn verified_count(&self) -> u64 {
        self.verified
    }

    /// Whether a break has been found.
    pub fn is_broken(&self) -> bool {
        matches!(self.state, State::Broken(_))
    }

    /// The break found so far, if any.
    pub fn broken_at(&self) -> Option<&ChainBreak> {
        match &self.state {
            State::Broken(brk) => Some(brk),
            _ => None,
        }
    }

    /// Feed the next event in ascending order.
    ///
    /// Returns `false` once the chain is known to be broken.
    pub fn feed(&mut self, event: &AuditEvent) -> bool {
        if self.is_broken() {
            return false;
        }

        match self.check(event) {
            Ok(()) => {
                self.state = State::Verifying {
                    expected_previous: event.integrity_hash,
                    last_timestamp: event.timestamp,
                };
                self.verified += 1;
                true
            }
            Err(kind) => {
                self.state = State::Broken(ChainBreak {
                    index: self.verified,
                    event_id: Some(event.id),
                    kind,
                });
                false
            }
        }
    }

    fn check(&self, event: &AuditEvent) -> Result<(), BreakKind> {
        if event.chain_id() != self.chain_id {
            return Err(BreakKind::ForeignEvent);
        }

        if event.sequence != self.verified {
            return Err(BreakKind::SequenceGap {
                expected: self.verified,
                found: event.sequence,
            });
        }

        let (expected_previous, last_timestamp) = match &self.state {
            State::Verifying {
                expected_previous,
                last_timestamp,
            } => (Some(*expected_previous), Some(*last_timestamp)),
            _ => (None, None),
        };

        if event.previous_hash != expected_previous {
            return Err(BreakKind::PreviousHashMismatch {
                expected: expected_previous,
                found: event.previous_hash,
            });
        }

        if let Some(previous) = last_timestamp {
            if event.timestamp < previous {
                return Err(BreakKind::TimestampRegression {
                    previous,
                    found: event.timestamp,
                });
            }
        }

        if event.before.as_ref().is_some_and(|s| !s.verify()) {
            return Err(BreakKind::SnapshotMismatch {
                side: SnapshotSide::Before,
            });
        }
        if event.after.as_ref().is_some_and(|s| !s.verify()) {
            return Err(BreakKind::SnapshotMismatch {
                side: SnapshotSide::After,
            });
        }

        let computed = integrity_hash(event);
        if computed != event.integrity_hash {
            return Err(BreakKind::IntegrityMismatch {
                stored: event.integrity_hash,
                computed,
            });
        }

        Ok(())
    }

    /// Conclude the scan.
    ///
    /// `total_count` is the number of events the chain is known to hold; a
    /// clean scan that saw fewer events is reported as broken.
    pub fn finish(self, total_count: u64) -> VerificationReport {
        let broken_at = match self.state {
            State::Broken(brk) => Some(brk),
            _ if self.verified < total_count => Some(ChainBreak {
                index: self.verified,
                event_id: None,
                kind: BreakKind::MissingEvents {
                    expected: total_count,
                    found: self.verified,
                },
            }),
            _ => None,
        };

        VerificationReport {
            chain: self.chain,
            valid: broken_at.is_none(),
            verified_count: self.verified,
            total_count: total_count.max(self.verified),
            broken_at,
        }
    }
}

/// Verify a complete, ascending slice of a chain's events.
pub fn verify_events(chain: ChainKey, events: &[AuditEvent]) -> VerificationReport {
    let mut verifier = ChainVerifier::new(chain);
    for event in events {
        if !verifier.feed(event) {
            break;
        }
    }
    verifier.finish(events.len() as u64)
}
