//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the canonical JSON encoding, the payload hash, and the
//! integrity hash layout. Any change to one of them invalidates every chain
//! already stored, so a failing vector is a compatibility break, not a test
//! to update.

use serde_json::{json, Value};

use chronicle_core::{
    AuditEvent, ChainKey, ChainTail, EventBuilder, EventId, EventType, Severity,
};

/// A canonical encoding vector.
#[derive(Debug, Clone)]
pub struct PayloadVector {
    pub name: &'static str,
    pub input: Value,
    pub canonical: &'static str,
    /// SHA-256 of `canonical` (hex).
    pub hash: &'static str,
}

/// All canonical encoding vectors.
pub fn payload_vectors() -> Vec<PayloadVector> {
    vec![
        PayloadVector {
            name: "single key",
            input: json!({"role": "member"}),
            canonical: r#"{"role":"member"}"#,
            hash: "69f528af08094c0acdf3ad32b32ce7250dbf777181ca047d0598c9449076f4a7",
        },
        PayloadVector {
            name: "nested, unsorted",
            input: json!({"c": {"z": 0, "y": -1.5}, "b": 1, "a": [true, null, "x"]}),
            canonical: r#"{"a":[true,null,"x"],"b":1,"c":{"y":-1.5,"z":0}}"#,
            hash: "f2672be56d72f7439ce68a630c19c0c273a23a703bfec548dd7ea1203d886dc5",
        },
        PayloadVector {
            name: "empty object",
            input: json!({}),
            canonical: "{}",
            hash: "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
        },
        PayloadVector {
            name: "non-ascii string",
            input: json!("café"),
            canonical: "\"café\"",
            hash: "28380feb8724d669bc8d4cf5b5a5bb1adbdc61b81ebd06f3fabc567b4f3b0fc5",
        },
    ]
}

/// An integrity hash vector: a fully specified event and its hash.
#[derive(Debug, Clone)]
pub struct EventVector {
    pub name: &'static str,
    pub id_byte: u8,
    pub organization_id: &'static str,
    pub correlation_id: &'static str,
    pub request_id: &'static str,
    pub user_id: Option<&'static str>,
    pub event_type: EventType,
    pub action: &'static str,
    pub resource: &'static str,
    pub resource_id: Option<&'static str>,
    pub resource_type: Option<&'static str>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub timestamp: i64,
    pub severity: Option<Severity>,
    pub session_id: Option<&'static str>,
    pub ip_address: Option<&'static str>,
    pub user_agent: Option<&'static str>,
    /// Index of the vector this one follows, if any.
    pub follows: Option<usize>,
    pub expected_integrity_hash: &'static str,
}

impl EventVector {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.organization_id, self.correlation_id, self.event_type)
    }

    /// Build and seal the event, positioned after `tail`.
    pub fn build(&self, tail: Option<&ChainTail>) -> AuditEvent {
        let opt = |v: Option<&str>| v.map(String::from);
        EventBuilder::new(self.chain_key(), self.request_id, self.action, self.resource)
            .id(EventId::from_bytes([self.id_byte; 16]))
            .user(opt(self.user_id))
            .resource_id(opt(self.resource_id))
            .resource_type(opt(self.resource_type))
            .before(self.before.as_ref())
            .after(self.after.as_ref())
            .severity(self.severity)
            .session(opt(self.session_id))
            .client(opt(self.ip_address), opt(self.user_agent))
            .timestamp(self.timestamp)
            .follows(tail)
            .seal()
            .expect("golden vector must be valid")
    }
}

/// All integrity vectors, in build order.
pub fn event_vectors() -> Vec<EventVector> {
    vec![
        EventVector {
            name: "genesis role change",
            id_byte: 0x01,
            organization_id: "org-1",
            correlation_id: "req-1",
            request_id: "req-1",
            user_id: Some("user-1"),
            event_type: EventType::RoleChange,
            action: "update",
            resource: "member",
            resource_id: Some("m-1"),
            resource_type: None,
            before: Some(json!({"role": "member"})),
            after: Some(json!({"role": "admin"})),
            timestamp: 1_700_000_000_000,
            severity: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            follows: None,
            expected_integrity_hash:
                "67ec2590669a16a5a7ed5a84780ffd92d374fbbc77e62b60a94c0722e813dec3",
        },
        EventVector {
            name: "system revert on the same chain",
            id_byte: 0x02,
            organization_id: "org-1",
            correlation_id: "req-1",
            request_id: "req-1",
            user_id: None,
            event_type: EventType::RoleChange,
            action: "revert",
            resource: "member",
            resource_id: Some("m-1"),
            resource_type: None,
            before: Some(json!({"role": "admin"})),
            after: Some(json!({"role": "member"})),
            timestamp: 1_700_000_000_500,
            severity: None,
            session_id: None,
            ip_address: None,
            user_agent: None,
            follows: Some(0),
            expected_integrity_hash:
                "39bd45db9d96c46619f700561cad1eb0d2ba44fc99aaa034f2cca4c145edb691",
        },
        EventVector {
            name: "security event with client context",
            id_byte: 0x03,
            organization_id: "org-2",
            correlation_id: "incident-9",
            request_id: "req-9",
            user_id: Some("sec-bot"),
            event_type: EventType::SecurityEvent,
            action: "block",
            resource: "gateway",
            resource_id: None,
            resource_type: Some("ip"),
            before: None,
            after: None,
            timestamp: 1_700_000_001_000,
            severity: Some(Severity::Critical),
            session_id: Some("s-1"),
            ip_address: Some("203.0.113.7"),
            user_agent: Some("curl/8.0"),
            follows: None,
            expected_integrity_hash:
                "f5dd9210995c36af69486ffe126ad026f34ff47ef67da4f2b4e63811ddc5f19d",
        },
    ]
}

/// Build every event vector, linking each to the one it follows.
pub fn build_event_vectors() -> Vec<AuditEvent> {
    let mut built: Vec<AuditEvent> = Vec::new();
    for vector in event_vectors() {
        let tail = vector.follows.map(|i| built[i].as_tail());
        built.push(vector.build(tail.as_ref()));
    }
    built
}
