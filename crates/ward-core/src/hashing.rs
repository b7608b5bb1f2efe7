//! Deterministic SHA-256 over JSON-canonicalized values.
//!
//! Canonical form: UTF-8, keys sorted recursively, no insignificant
//! whitespace. `serde_json::Value` objects are backed by a `BTreeMap`-like
//! ordering once rebuilt through [`canonicalize`], so `serde_json::to_vec`
//! already emits compact, key-sorted bytes.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively rebuilds `value` so that every object's keys are sorted.
/// Arrays keep their original order; scalars pass through unchanged.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON bytes for `value`: sorted keys, compact separators, UTF-8.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonicalized JSON is always serializable")
}

/// Hex-encoded SHA-256 of `value`'s canonical JSON form.
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json_bytes(value));
    hex::encode(hasher.finalize())
}

/// Convenience for hashing a `Serialize` type without an intermediate
/// `Value` at the call site.
pub fn canonical_hash_of<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let v = serde_json::to_value(value)?;
    Ok(canonical_hash(&v))
}

/// Hex-encoded SHA-256 of raw bytes, used for owner-id hashing and the
/// salted argument fingerprint.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
