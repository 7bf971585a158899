//! Canonical JSON encoding for deterministic payload hashing.
//!
//! The canonical form of a structured payload is compact JSON text where:
//! - Object keys are sorted by UTF-8 byte order, at every depth
//! - No insignificant whitespace is emitted
//! - Strings use `serde_json`'s escaping, numbers its shortest round-trip form
//!
//! Two payloads that differ only in key order therefore produce identical
//! bytes, and identical [`Sha256Hash`] digests on every platform.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::Sha256Hash;
use crate::error::{CoreError, Result};

/// Encode a JSON value to its canonical text form.
pub fn canonical_json(value: &Value) -> String {
    let mut buf = String::new();
    encode_value_to(&mut buf, value);
    buf
}

/// SHA-256 of the canonical encoding of `value`.
pub fn hash_payload(value: &Value) -> Sha256Hash {
    Sha256Hash::hash(canonical_json(value).as_bytes())
}

/// Recursively encode a JSON value.
fn encode_value_to(buf: &mut String, value: &Value) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => encode_string(buf, s),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                encode_value_to(buf, item);
            }
            buf.push(']');
        }
        Value::Object(map) => {
            // Sort explicitly; the map's own iteration order depends on
            // whether serde_json's `preserve_order` feature is enabled.
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            buf.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                encode_string(buf, key);
                buf.push(':');
                encode_value_to(buf, val);
            }
            buf.push('}');
        }
    }
}

fn encode_string(buf: &mut String, s: &str) {
    buf.push_str(&Value::String(s.to_owned()).to_string());
}

/// A captured before/after state of a resource.
///
/// Stores the canonical text alongside its hash. The canonical text is what
/// gets persisted and exported; the value is re-parsed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Canonical JSON text of the captured state.
    pub canonical: String,

    /// SHA-256 of `canonical`.
    pub hash: Sha256Hash,
}

impl Snapshot {
    /// Canonicalize and hash a payload.
    pub fn capture(value: &Value) -> Self {
        let canonical = canonical_json(value);
        let hash = Sha256Hash::hash(canonical.as_bytes());
        Self { canonical, hash }
    }

    /// Capture an optional payload; `None` stays `None` with no hash.
    pub fn capture_opt(value: Option<&Value>) -> Option<Self> {
        value.map(Self::capture)
    }

    /// Rebuild from stored parts without recomputing anything.
    pub fn from_parts(canonical: String, hash: Sha256Hash) -> Self {
        Self { canonical, hash }
    }

    /// Check that the stored hash matches the stored text.
    pub fn verify(&self) -> bool {
        Sha256Hash::hash(self.canonical.as_bytes()) == self.hash
    }

    /// Check self-consistency, reporting both hashes on mismatch.
    pub fn check(&self) -> Result<()> {
        let actual = Sha256Hash::hash(self.canonical.as_bytes());
        if actual == self.hash {
            Ok(())
        } else {
            Err(CoreError::SnapshotHashMismatch {
                expected: self.hash.to_hex(),
                actual: actual.to_hex(),
            })
        }
    }

    /// Parse the canonical text back into a JSON value.
    pub fn value(&self) -> Result<Value> {
        serde_json::from_str(&self.canonical).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}
