//! Canonical JSON serialization and content hashing.
//!
//! Every hash-stable artifact in this crate (`patch_id`, `envelope_hash`,
//! `rebanker_hash`) is computed over this canonical form: object keys sorted
//! recursively, no insignificant whitespace, UTF-8. This makes hashing
//! independent of map iteration order and struct field order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys so two semantically-equal JSON values always
/// serialize identically regardless of how they were constructed.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` to its canonical JSON string: sorted keys, compact.
pub fn to_canonical_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    let sorted = canonicalize(&raw);
    serde_json::to_string(&sorted)
}

/// Canonicalize a [`Value`] directly, skipping the serialize round-trip.
pub fn canonical_value(value: &Value) -> Value {
    canonicalize(value)
}

/// Hex-encoded SHA-256 digest of a string.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of a value's canonical JSON form.
pub fn canonical_hash<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(sha256_hex(&to_canonical_string(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_canonical_string() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            to_canonical_string(&a).unwrap(),
            to_canonical_string(&b).unwrap()
        );
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
        let s = to_canonical_string(&v).unwrap();
        assert_eq!(s, r#"{"a":1,"z":{"x":2,"y":1}}"#);
    }

    #[test]
    fn hash_is_deterministic() {
        let v = json!({"patch": "fn main() {}", "lang": "rust"});
        let h1 = canonical_hash(&v).unwrap();
        let h2 = canonical_hash(&v).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hash_changes_with_content() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }
}
