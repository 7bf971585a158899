//! Chains: independent, linearly linked sequences of audit events.
//!
//! A chain is identified by the triple `(organization_id, correlation_id,
//! event_type)`. Events in different chains are never linked to each other.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Sha256Hash;
use crate::event::EventType;

/// Domain tag for chain id derivation.
const CHAIN_ID_DOMAIN: &[u8] = b"chronicle/chain/v1";

/// The logical key of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainKey {
    pub organization_id: String,
    pub correlation_id: String,
    pub event_type: EventType,
}

impl ChainKey {
    pub fn new(
        organization_id: impl Into<String>,
        correlation_id: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            correlation_id: correlation_id.into(),
            event_type,
        }
    }

    /// Build the key for an event raised within a request.
    ///
    /// Falls back to the request id when the caller supplied no correlation
    /// id, so uncorrelated requests each form their own chain.
    pub fn for_request(
        organization_id: &str,
        correlation_id: Option<&str>,
        request_id: &str,
        event_type: EventType,
    ) -> Self {
        let correlation = match correlation_id {
            Some(c) if !c.is_empty() => c,
            _ => request_id,
        };
        Self::new(organization_id, correlation, event_type)
    }

    /// Derive the chain's 32-byte id.
    ///
    /// Each field is length-prefixed, so `("a:b", "c")` and `("a", "b:c")`
    /// never collide.
    pub fn id(&self) -> ChainId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CHAIN_ID_DOMAIN);
        for field in [
            self.organization_id.as_bytes(),
            self.correlation_id.as_bytes(),
            self.event_type.as_str().as_bytes(),
        ] {
            hasher.update(&(field.len() as u32).to_be_bytes());
            hasher.update(field);
        }
        ChainId(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id, self.correlation_id, self.event_type
        )
    }
}

/// A 32-byte chain identifier derived from a [`ChainKey`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub [u8; 32]);

impl ChainId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ChainId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&ChainKey> for ChainId {
    fn from(key: &ChainKey) -> Self {
        key.id()
    }
}

/// The position of a chain's most recent event.
///
/// This is all an append needs to know about a chain: the next event links
/// to `integrity_hash`, takes `sequence + 1`, and may not be timestamped
/// earlier than `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTail {
    pub sequence: u64,
    pub integrity_hash: Sha256Hash,
    pub timestamp: i64,
}

impl ChainTail {
    /// The sequence number the next event must take, or `None` once the
    /// chain has used up the sequence space.
    pub fn next_sequence(&self) -> Option<u64> {
        self.sequence.checked_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_sequence_checked() {
        let tail = |sequence| ChainTail {
            sequence,
            integrity_hash: Sha256Hash::from_bytes([0u8; 32]),
            timestamp: 0,
        };
        assert_eq!(tail(0).next_sequence(), Some(1));
        assert_eq!(tail(u64::MAX - 1).next_sequence(), Some(u64::MAX));
        assert_eq!(tail(u64::MAX).next_sequence(), None);
    }

    #[test]
    fn test_chain_id_deterministic() {
        let a = ChainKey::new("org-1", "req-1", EventType::RoleChange);
        let b = ChainKey::new("org-1", "req-1", EventType::RoleChange);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_chain_id_distinct_per_component() {
        let base = ChainKey::new("org-1", "req-1", EventType::RoleChange);
        let other_org = ChainKey::new("org-2", "req-1", EventType::RoleChange);
        let other_corr = ChainKey::new("org-1", "req-2", EventType::RoleChange);
        let other_type = ChainKey::new("org-1", "req-1", EventType::PermissionChange);

        assert_ne!(base.id(), other_org.id());
        assert_ne!(base.id(), other_corr.id());
        assert_ne!(base.id(), other_type.id());
    }

    #[test]
    fn test_chain_id_no_separator_collision() {
        let a = ChainKey::new("a:b", "c", EventType::DataAccess);
        let b = ChainKey::new("a", "b:c", EventType::DataAccess);
        assert_ne!(a.id(), b.id());

        let c = ChainKey::new("ab", "", EventType::DataAccess);
        let d = ChainKey::new("a", "b", EventType::DataAccess);
        assert_ne!(c.id(), d.id());
    }

    #[test]
    fn test_for_request_falls_back_to_request_id() {
        let key = ChainKey::for_request("org", None, "req-9", EventType::DataExport);
        assert_eq!(key.correlation_id, "req-9");

        let key = ChainKey::for_request("org", Some(""), "req-9", EventType::DataExport);
        assert_eq!(key.correlation_id, "req-9");

        let key = ChainKey::for_request("org", Some("corr"), "req-9", EventType::DataExport);
        assert_eq!(key.correlation_id, "corr");
    }

    #[test]
    fn test_chain_id_hex_roundtrip() {
        let id = ChainKey::new("o", "c", EventType::SystemEvent).id();
        assert_eq!(ChainId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_display() {
        let key = ChainKey::new("org", "corr", EventType::RoleChange);
        assert_eq!(key.to_string(), "org/corr/ROLE_CHANGE");
    }
}
