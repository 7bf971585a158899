//! Regulatory exports.
//!
//! An export transcribes stored events as they are: hashes are copied from
//! the ledger, never recomputed, so an auditor can check them against the
//! ledger independently. Snapshot contents are only written when explicitly
//! requested; their hashes always are.
//!
//! Every export carries one [`ChainAttestation`] per chain it touches, and a
//! SHA-256 digest of the rendered payload. When the ledger holds a signing
//! key, the digest is signed with Ed25519.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use chronicle_core::{
    canonical_json, format_millis, AuditEvent, ChainBreak, ChainId, ChainKey, Ed25519PublicKey,
    Ed25519Signature, Keypair, Sha256Hash, Snapshot, VerificationReport,
};

use crate::error::{LedgerError, Result};

/// Domain separator for export signatures.
const SIGNATURE_DOMAIN: &[u8] = b"chronicle/export/v1";

/// Output format of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Xml,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xml => "application/xml",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(LedgerError::Export(format!("unknown export format: {other}"))),
        }
    }
}

/// What an export contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub format: ExportFormat,

    /// Write the before/after snapshot contents, not just their hashes.
    pub include_snapshots: bool,

    /// Verify every touched chain and attest the result.
    pub verify_chains: bool,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_snapshots(mut self, include: bool) -> Self {
        self.include_snapshots = include;
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_chains = verify;
        self
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            include_snapshots: false,
            verify_chains: true,
        }
    }
}

/// Verification status of a chain, as attested in an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Valid,
    Broken,
    Unverified,
}

impl ChainStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainStatus::Valid => "VALID",
            ChainStatus::Broken => "BROKEN",
            ChainStatus::Unverified => "UNVERIFIED",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of one chain touched by an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAttestation {
    pub chain: ChainKey,
    pub status: ChainStatus,

    /// Events of this chain included in the export.
    pub exported_events: u64,

    /// Events the chain holds in the ledger.
    pub total_events: u64,

    pub verified_events: u64,
    pub broken_at: Option<ChainBreak>,
}

impl ChainAttestation {
    pub fn from_report(report: VerificationReport, exported_events: u64) -> Self {
        Self {
            status: if report.valid {
                ChainStatus::Valid
            } else {
                ChainStatus::Broken
            },
            chain: report.chain,
            exported_events,
            total_events: report.total_count,
            verified_events: report.verified_count,
            broken_at: report.broken_at,
        }
    }

    pub fn unverified(chain: ChainKey, exported_events: u64, total_events: u64) -> Self {
        Self {
            chain,
            status: ChainStatus::Unverified,
            exported_events,
            total_events,
            verified_events: 0,
            broken_at: None,
        }
    }
}

/// Ed25519 signature over an export digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSignature {
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

/// A rendered export with its attestations.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBundle {
    pub format: ExportFormat,
    pub payload: Bytes,

    /// SHA-256 of `payload`.
    pub digest: Sha256Hash,

    pub event_count: u64,
    pub chains: Vec<ChainAttestation>,

    /// Unix milliseconds.
    pub generated_at: i64,

    pub signature: Option<ExportSignature>,
}

impl ExportBundle {
    /// Whether every touched chain verified.
    pub fn all_chains_valid(&self) -> bool {
        self.chains.iter().all(|c| c.status == ChainStatus::Valid)
    }

    /// Check the digest against the payload and the signature against the
    /// digest. An unsigned bundle fails.
    pub fn verify_signature(&self) -> Result<()> {
        let sig = self
            .signature
            .as_ref()
            .ok_or_else(|| LedgerError::Export("bundle is not signed".into()))?;
        if Sha256Hash::hash(&self.payload) != self.digest {
            return Err(LedgerError::Export("payload does not match digest".into()));
        }
        sig.public_key
            .verify(&signing_message(&self.digest), &sig.signature)
            .map_err(|e| LedgerError::Export(e.to_string()))
    }
}

fn signing_message(digest: &Sha256Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 32);
    msg.extend_from_slice(SIGNATURE_DOMAIN);
    msg.extend_from_slice(digest.as_bytes());
    msg
}

/// Render `events` (in chain order) and assemble the bundle.
pub(crate) fn build_bundle(
    events: &[AuditEvent],
    chains: Vec<ChainAttestation>,
    options: &ExportOptions,
    generated_at: i64,
    key: Option<&Keypair>,
) -> Result<ExportBundle> {
    let statuses: HashMap<ChainId, ChainStatus> =
        chains.iter().map(|c| (c.chain.id(), c.status)).collect();
    let status_of = |event: &AuditEvent| {
        statuses
            .get(&event.chain_id())
            .copied()
            .unwrap_or(ChainStatus::Unverified)
    };

    let payload = match options.format {
        ExportFormat::Json => render_json(events, &chains, options, generated_at, status_of)?,
        ExportFormat::Csv => render_csv(events, options, status_of),
        ExportFormat::Xml => render_xml(events, &chains, options, generated_at, status_of),
    };

    let digest = Sha256Hash::hash(payload.as_bytes());
    let signature = key.map(|key| ExportSignature {
        public_key: key.public_key(),
        signature: key.sign(&signing_message(&digest)),
    });

    Ok(ExportBundle {
        format: options.format,
        payload: Bytes::from(payload),
        digest,
        event_count: events.len() as u64,
        chains,
        generated_at,
        signature,
    })
}

fn hash_hex(hash: Option<&Sha256Hash>) -> String {
    hash.map(Sha256Hash::to_hex).unwrap_or_default()
}

fn snapshot_hash(snapshot: Option<&Snapshot>) -> String {
    hash_hex(snapshot.map(|s| &s.hash))
}

fn snapshot_text(snapshot: Option<&Snapshot>, include: bool) -> Option<String> {
    if include {
        snapshot.map(|s| s.canonical.clone())
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonDocument<'a> {
    generated_at: String,
    event_count: usize,
    chains: Vec<JsonChain<'a>>,
    events: Vec<JsonEvent<'a>>,
}

#[derive(Serialize)]
struct JsonChain<'a> {
    organization_id: &'a str,
    correlation_id: &'a str,
    event_type: &'a str,
    status: ChainStatus,
    exported_events: u64,
    total_events: u64,
    verified_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    broken_at: Option<String>,
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    id: String,
    timestamp: String,
    organization_id: &'a str,
    correlation_id: &'a str,
    event_type: &'a str,
    sequence: u64,
    actor: &'a str,
    request_id: &'a str,
    session_id: Option<&'a str>,
    ip_address: Option<&'a str>,
    user_agent: Option<&'a str>,
    action: &'a str,
    resource: &'a str,
    resource_id: Option<&'a str>,
    resource_type: Option<&'a str>,
    severity: &'a str,
    before_hash: String,
    after_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<String>,
    previous_hash: String,
    integrity_hash: String,
    tags: &'a [String],
    metadata: &'a serde_json::Value,
    chain_status: ChainStatus,
}

fn render_json(
    events: &[AuditEvent],
    chains: &[ChainAttestation],
    options: &ExportOptions,
    generated_at: i64,
    status_of: impl Fn(&AuditEvent) -> ChainStatus,
) -> Result<String> {
    let doc = JsonDocument {
        generated_at: format_millis(generated_at),
        event_count: events.len(),
        chains: chains
            .iter()
            .map(|c| JsonChain {
                organization_id: &c.chain.organization_id,
                correlation_id: &c.chain.correlation_id,
                event_type: c.chain.event_type.as_str(),
                status: c.status,
                exported_events: c.exported_events,
                total_events: c.total_events,
                verified_events: c.verified_events,
                broken_at: c.broken_at.as_ref().map(describe_break),
            })
            .collect(),
        events: events
            .iter()
            .map(|e| JsonEvent {
                id: e.id.to_string(),
                timestamp: format_millis(e.timestamp),
                organization_id: &e.organization_id,
                correlation_id: &e.correlation_id,
                event_type: e.event_type.as_str(),
                sequence: e.sequence,
                actor: e.actor(),
                request_id: &e.request_id,
                session_id: e.session_id.as_deref(),
                ip_address: e.ip_address.as_deref(),
                user_agent: e.user_agent.as_deref(),
                action: &e.action,
                resource: &e.resource,
                resource_id: e.resource_id.as_deref(),
                resource_type: e.resource_type.as_deref(),
                severity: e.severity.as_str(),
                before_hash: snapshot_hash(e.before.as_ref()),
                after_hash: snapshot_hash(e.after.as_ref()),
                before: snapshot_text(e.before.as_ref(), options.include_snapshots),
                after: snapshot_text(e.after.as_ref(), options.include_snapshots),
                previous_hash: hash_hex(e.previous_hash.as_ref()),
                integrity_hash: e.integrity_hash.to_hex(),
                tags: &e.tags,
                metadata: &e.metadata,
                chain_status: status_of(e),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).map_err(|e| LedgerError::Export(e.to_string()))
}

fn describe_break(brk: &ChainBreak) -> String {
    match &brk.event_id {
        Some(id) => format!("event {} (index {}): {}", id, brk.index, brk.kind),
        None => format!("index {}: {}", brk.index, brk.kind),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CSV
// ─────────────────────────────────────────────────────────────────────────────

const CSV_COLUMNS: &[&str] = &[
    "id",
    "timestamp",
    "organization_id",
    "correlation_id",
    "event_type",
    "sequence",
    "actor",
    "request_id",
    "session_id",
    "ip_address",
    "user_agent",
    "action",
    "resource",
    "resource_id",
    "resource_type",
    "severity",
    "before_hash",
    "after_hash",
    "previous_hash",
    "integrity_hash",
    "tags",
    "metadata",
    "chain_status",
];

fn render_csv(
    events: &[AuditEvent],
    options: &ExportOptions,
    status_of: impl Fn(&AuditEvent) -> ChainStatus,
) -> String {
    let mut out = String::new();

    let mut header: Vec<&str> = CSV_COLUMNS.to_vec();
    if options.include_snapshots {
        header.extend(["before", "after"]);
    }
    push_csv_row(&mut out, header.iter().map(|h| h.to_string()));

    for e in events {
        let mut row = vec![
            e.id.to_string(),
            format_millis(e.timestamp),
            e.organization_id.clone(),
            e.correlation_id.clone(),
            e.event_type.as_str().to_string(),
            e.sequence.to_string(),
            e.actor().to_string(),
            e.request_id.clone(),
            e.session_id.clone().unwrap_or_default(),
            e.ip_address.clone().unwrap_or_default(),
            e.user_agent.clone().unwrap_or_default(),
            e.action.clone(),
            e.resource.clone(),
            e.resource_id.clone().unwrap_or_default(),
            e.resource_type.clone().unwrap_or_default(),
            e.severity.as_str().to_string(),
            snapshot_hash(e.before.as_ref()),
            snapshot_hash(e.after.as_ref()),
            hash_hex(e.previous_hash.as_ref()),
            e.integrity_hash.to_hex(),
            e.tags.join(";"),
            canonical_json(&e.metadata),
            status_of(e).as_str().to_string(),
        ];
        if options.include_snapshots {
            row.push(snapshot_text(e.before.as_ref(), true).unwrap_or_default());
            row.push(snapshot_text(e.after.as_ref(), true).unwrap_or_default());
        }
        push_csv_row(&mut out, row);
    }
    out
}

fn push_csv_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(&field));
    }
    out.push_str("\r\n");
}

/// Quote a field per RFC 4180 when it needs it.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// XML
// ─────────────────────────────────────────────────────────────────────────────

fn render_xml(
    events: &[AuditEvent],
    chains: &[ChainAttestation],
    options: &ExportOptions,
    generated_at: i64,
    status_of: impl Fn(&AuditEvent) -> ChainStatus,
) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<auditExport generatedAt=\"{}\" eventCount=\"{}\">\n",
        format_millis(generated_at),
        events.len()
    ));

    out.push_str("  <chains>\n");
    for c in chains {
        out.push_str(&format!(
            "    <chain organizationId=\"{}\" correlationId=\"{}\" eventType=\"{}\" status=\"{}\" exportedEvents=\"{}\" totalEvents=\"{}\" verifiedEvents=\"{}\"",
            xml_escape(&c.chain.organization_id),
            xml_escape(&c.chain.correlation_id),
            c.chain.event_type,
            c.status,
            c.exported_events,
            c.total_events,
            c.verified_events,
        ));
        match &c.broken_at {
            Some(brk) => out.push_str(&format!(
                "><brokenAt>{}</brokenAt></chain>\n",
                xml_escape(&describe_break(brk))
            )),
            None => out.push_str("/>\n"),
        }
    }
    out.push_str("  </chains>\n");

    out.push_str("  <events>\n");
    for e in events {
        out.push_str(&format!(
            "    <event id=\"{}\" sequence=\"{}\" chainStatus=\"{}\">\n",
            e.id,
            e.sequence,
            status_of(e)
        ));
        let mut element = |name: &str, value: &str| {
            out.push_str(&format!("      <{name}>{}</{name}>\n", xml_escape(value)));
        };
        element("timestamp", &format_millis(e.timestamp));
        element("organizationId", &e.organization_id);
        element("correlationId", &e.correlation_id);
        element("eventType", e.event_type.as_str());
        element("actor", e.actor());
        element("requestId", &e.request_id);
        element("sessionId", e.session_id.as_deref().unwrap_or_default());
        element("ipAddress", e.ip_address.as_deref().unwrap_or_default());
        element("userAgent", e.user_agent.as_deref().unwrap_or_default());
        element("action", &e.action);
        element("resource", &e.resource);
        element("resourceId", e.resource_id.as_deref().unwrap_or_default());
        element("resourceType", e.resource_type.as_deref().unwrap_or_default());
        element("severity", e.severity.as_str());
        element("beforeHash", &snapshot_hash(e.before.as_ref()));
        element("afterHash", &snapshot_hash(e.after.as_ref()));
        if let Some(before) = snapshot_text(e.before.as_ref(), options.include_snapshots) {
            element("before", &before);
        }
        if let Some(after) = snapshot_text(e.after.as_ref(), options.include_snapshots) {
            element("after", &after);
        }
        element("previousHash", &hash_hex(e.previous_hash.as_ref()));
        element("integrityHash", &e.integrity_hash.to_hex());
        for tag in &e.tags {
            element("tag", tag);
        }
        element("metadata", &canonical_json(&e.metadata));
        out.push_str("    </event>\n");
    }
    out.push_str("  </events>\n");
    out.push_str("</auditExport>\n");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
