//! Audit events: the immutable unit of the ledger.
//!
//! An [`AuditEvent`] records one privileged action. It is assembled with an
//! [`EventBuilder`], positioned after its chain's tail, and sealed with an
//! integrity hash. Once sealed it is never modified.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::canonical::Snapshot;
use crate::chain::{ChainId, ChainKey, ChainTail};
use crate::crypto::Sha256Hash;
use crate::error::{CoreError, ValidationError};
use crate::integrity::integrity_hash;
use crate::types::EventId;
use crate::validation::validate_event;

/// Actor recorded in the integrity hash for system-initiated events.
pub const SYSTEM_ACTOR: &str = "system";

/// The category of a privileged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Authentication,
    Authorization,
    DataAccess,
    DataModification,
    DataDeletion,
    DataExport,
    RoleChange,
    PermissionChange,
    OrganizationChange,
    ConfigurationChange,
    SecurityEvent,
    SystemEvent,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 12] = [
        EventType::Authentication,
        EventType::Authorization,
        EventType::DataAccess,
        EventType::DataModification,
        EventType::DataDeletion,
        EventType::DataExport,
        EventType::RoleChange,
        EventType::PermissionChange,
        EventType::OrganizationChange,
        EventType::ConfigurationChange,
        EventType::SecurityEvent,
        EventType::SystemEvent,
    ];

    /// The wire name, e.g. `ROLE_CHANGE`.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Authentication => "AUTHENTICATION",
            EventType::Authorization => "AUTHORIZATION",
            EventType::DataAccess => "DATA_ACCESS",
            EventType::DataModification => "DATA_MODIFICATION",
            EventType::DataDeletion => "DATA_DELETION",
            EventType::DataExport => "DATA_EXPORT",
            EventType::RoleChange => "ROLE_CHANGE",
            EventType::PermissionChange => "PERMISSION_CHANGE",
            EventType::OrganizationChange => "ORGANIZATION_CHANGE",
            EventType::ConfigurationChange => "CONFIGURATION_CHANGE",
            EventType::SecurityEvent => "SECURITY_EVENT",
            EventType::SystemEvent => "SYSTEM_EVENT",
        }
    }

    /// The severity assigned when the caller does not override it.
    ///
    /// `SecurityEvent` has no default: the caller must say how bad it is.
    pub const fn default_severity(self) -> Option<Severity> {
        match self {
            EventType::DataDeletion
            | EventType::RoleChange
            | EventType::PermissionChange
            | EventType::OrganizationChange
            | EventType::ConfigurationChange => Some(Severity::High),
            EventType::Authentication
            | EventType::Authorization
            | EventType::DataModification
            | EventType::DataExport => Some(Severity::Medium),
            EventType::DataAccess | EventType::SystemEvent => Some(Severity::Low),
            EventType::SecurityEvent => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownEventType(s.to_string()))
    }
}

/// How serious an event is. Ordered from `Low` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownSeverity(s.to_string()))
    }
}

/// A sealed, immutable audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub organization_id: String,

    /// Acting user; `None` for system-initiated actions.
    pub user_id: Option<String>,

    pub correlation_id: String,
    pub request_id: String,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    pub event_type: EventType,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,

    /// Zero-based position within the chain.
    pub sequence: u64,

    /// Unix milliseconds. Never earlier than the previous event in the chain.
    pub timestamp: i64,

    pub before: Option<Snapshot>,
    pub after: Option<Snapshot>,

    /// Integrity hash of the previous event; `None` only for the first event.
    pub previous_hash: Option<Sha256Hash>,

    pub integrity_hash: Sha256Hash,
    pub severity: Severity,

    /// Labels for search. Not covered by the integrity hash.
    pub tags: Vec<String>,

    /// Free-form context. Not covered by the integrity hash.
    pub metadata: Value,
}

impl AuditEvent {
    /// The key of the chain this event belongs to.
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(
            self.organization_id.clone(),
            self.correlation_id.clone(),
            self.event_type,
        )
    }

    /// The id of the chain this event belongs to.
    pub fn chain_id(&self) -> ChainId {
        self.chain_key().id()
    }

    /// The chain position this event establishes once stored.
    pub fn as_tail(&self) -> ChainTail {
        ChainTail {
            sequence: self.sequence,
            integrity_hash: self.integrity_hash,
            timestamp: self.timestamp,
        }
    }

    /// The actor as recorded in the integrity hash.
    pub fn actor(&self) -> &str {
        self.user_id.as_deref().unwrap_or(SYSTEM_ACTOR)
    }

    /// Whether this is the first event of its chain.
    pub fn is_chain_start(&self) -> bool {
        self.previous_hash.is_none()
    }

    /// Recompute the integrity hash and compare with the stored one.
    pub fn verify_integrity(&self) -> bool {
        integrity_hash(self) == self.integrity_hash
    }
}

/// Builder for audit events.
///
/// The builder collects the request context and payload, is positioned on
/// its chain with [`EventBuilder::follows`], and is finally sealed. Sealing
/// validates the event, resolves its severity, clamps its timestamp, and
/// computes the integrity hash.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: AuditEvent,
    severity: Option<Severity>,
    min_timestamp: i64,
    exhausted_at: Option<u64>,
}

impl EventBuilder {
    /// Start building an event on the given chain.
    pub fn new(
        chain: ChainKey,
        request_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            event: AuditEvent {
                id: EventId::new(),
                organization_id: chain.organization_id,
                user_id: None,
                correlation_id: chain.correlation_id,
                request_id: request_id.into(),
                session_id: None,
                ip_address: None,
                user_agent: None,
                event_type: chain.event_type,
                action: action.into(),
                resource: resource.into(),
                resource_id: None,
                resource_type: None,
                sequence: 0,
                timestamp: 0,
                before: None,
                after: None,
                previous_hash: None,
                integrity_hash: Sha256Hash::from_bytes([0u8; 32]),
                severity: Severity::Low,
                tags: Vec::new(),
                metadata: Value::Object(Default::default()),
            },
            severity: None,
            min_timestamp: i64::MIN,
            exhausted_at: None,
        }
    }

    /// Use a specific event id instead of a random one.
    pub fn id(mut self, id: EventId) -> Self {
        self.event.id = id;
        self
    }

    /// Set the acting user. `None` marks a system-initiated action.
    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.event.user_id = user_id;
        self
    }

    pub fn session(mut self, session_id: Option<String>) -> Self {
        self.event.session_id = session_id;
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.event.ip_address = ip_address;
        self.event.user_agent = user_agent;
        self
    }

    pub fn resource_id(mut self, resource_id: Option<String>) -> Self {
        self.event.resource_id = resource_id;
        self
    }

    pub fn resource_type(mut self, resource_type: Option<String>) -> Self {
        self.event.resource_type = resource_type;
        self
    }

    /// Capture the resource state before the action.
    pub fn before(mut self, state: Option<&Value>) -> Self {
        self.event.before = Snapshot::capture_opt(state);
        self
    }

    /// Capture the resource state after the action.
    pub fn after(mut self, state: Option<&Value>) -> Self {
        self.event.after = Snapshot::capture_opt(state);
        self
    }

    /// Override the event type's default severity.
    pub fn severity(mut self, severity: Option<Severity>) -> Self {
        self.severity = severity;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.event.tags = tags;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.event.metadata = metadata;
        self
    }

    /// Set the wall-clock time of the action (Unix milliseconds).
    pub fn timestamp(mut self, ts: i64) -> Self {
        self.event.timestamp = ts;
        self
    }

    /// Position the event after `tail`, or at the start of an empty chain.
    pub fn follows(mut self, tail: Option<&ChainTail>) -> Self {
        match tail {
            Some(tail) => {
                let next = tail.next_sequence();
                self.event.sequence = next.unwrap_or(tail.sequence);
                self.event.previous_hash = Some(tail.integrity_hash);
                self.min_timestamp = tail.timestamp;
                self.exhausted_at = next.is_none().then_some(tail.sequence);
            }
            None => {
                self.event.sequence = 0;
                self.event.previous_hash = None;
                self.min_timestamp = i64::MIN;
                self.exhausted_at = None;
            }
        }
        self
    }

    /// The chain this event will be appended to.
    pub fn chain_key(&self) -> ChainKey {
        self.event.chain_key()
    }

    /// The severity the sealed event will carry.
    pub fn resolved_severity(&self) -> Result<Severity, ValidationError> {
        self.severity
            .or_else(|| self.event.event_type.default_severity())
            .ok_or_else(|| ValidationError::SeverityRequired(self.event.event_type.to_string()))
    }

    /// Check everything that does not depend on the chain's position.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.resolved_severity()?;
        validate_event(&self.event)
    }

    /// Validate and seal the event.
    ///
    /// Fails with [`ValidationError::SequenceExhausted`] if the event was
    /// positioned after a tail at `u64::MAX`.
    pub fn seal(self) -> Result<AuditEvent, ValidationError> {
        if let Some(sequence) = self.exhausted_at {
            return Err(ValidationError::SequenceExhausted(sequence));
        }
        let severity = self.resolved_severity()?;
        let mut event = self.event;
        validate_event(&event)?;

        event.severity = severity;
        event.timestamp = event.timestamp.max(self.min_timestamp);
        event.integrity_hash = integrity_hash(&event);
        Ok(event)
    }
}
