//! Integrity hashing for audit events.
//!
//! The integrity hash is SHA-256 over a domain tag followed by a fixed
//! sequence of fields. Every field is written as a 4-byte big-endian length
//! and then its bytes, so no choice of field contents can shift bytes from
//! one field into another. Absent optional values are written as empty
//! strings; an absent user is written as `"system"`.
//!
//! Field order:
//!
//! | # | Field |
//! |---|---|
//! | 1 | request_id |
//! | 2 | user_id, or `"system"` |
//! | 3 | organization_id |
//! | 4 | event_type |
//! | 5 | action |
//! | 6 | resource |
//! | 7 | resource_id |
//! | 8 | timestamp (i64 big-endian) |
//! | 9 | before snapshot hash (hex) |
//! | 10 | after snapshot hash (hex) |
//! | 11 | previous_hash (hex) |
//! | 12 | id |
//! | 13 | correlation_id |
//! | 14 | sequence (u64 big-endian) |
//! | 15 | resource_type |
//! | 16 | severity |
//! | 17 | session_id |
//! | 18 | ip_address |
//! | 19 | user_agent |
//!
//! `tags`, `metadata` and the stored `integrity_hash` are not covered.

use sha2::{Digest, Sha256};

use crate::crypto::Sha256Hash;
use crate::event::AuditEvent;

/// Domain tag for integrity hashes.
pub const INTEGRITY_DOMAIN: &[u8] = b"chronicle/integrity/v1";

/// Compute the integrity hash of an event from its stored fields.
pub fn integrity_hash(event: &AuditEvent) -> Sha256Hash {
    let mut h = FieldHasher::new();

    h.field(event.request_id.as_bytes());
    h.field(event.actor().as_bytes());
    h.field(event.organization_id.as_bytes());
    h.field(event.event_type.as_str().as_bytes());
    h.field(event.action.as_bytes());
    h.field(event.resource.as_bytes());
    h.opt(event.resource_id.as_deref());
    h.field(&event.timestamp.to_be_bytes());
    h.hash_hex(event.before.as_ref().map(|s| &s.hash));
    h.hash_hex(event.after.as_ref().map(|s| &s.hash));
    h.hash_hex(event.previous_hash.as_ref());

    h.field(event.id.to_hyphenated().as_bytes());
    h.field(event.correlation_id.as_bytes());
    h.field(&event.sequence.to_be_bytes());
    h.opt(event.resource_type.as_deref());
    h.field(event.severity.as_str().as_bytes());
    h.opt(event.session_id.as_deref());
    h.opt(event.ip_address.as_deref());
    h.opt(event.user_agent.as_deref());

    h.finish()
}

struct FieldHasher(Sha256);

impl FieldHasher {
    fn new() -> Self {
        let mut inner = Sha256::new();
        inner.update(INTEGRITY_DOMAIN);
        Self(inner)
    }

    fn field(&mut self, bytes: &[u8]) {
        self.0.update((bytes.len() as u32).to_be_bytes());
        self.0.update(bytes);
    }

    fn opt(&mut self, value: Option<&str>) {
        self.field(value.unwrap_or("").as_bytes());
    }

    fn hash_hex(&mut self, hash: Option<&Sha256Hash>) {
        match hash {
            Some(h) => self.field(h.to_hex().as_bytes()),
            None => self.field(b""),
        }
    }

    fn finish(self) -> Sha256Hash {
        Sha256Hash::from_bytes(self.0.finalize().into())
    }
}
