//! Deterministic content fingerprinting for task-output cache keys.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively rebuild `value` with object keys in sorted order so the fingerprint
/// does not depend on the insertion order the caller happened to build the JSON in.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<&str, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.as_str(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.to_string(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Content hash of `(task_type, input)` used as a cache key. Two inputs that are
/// deeply equal after key-sorting canonicalization always hash to the same value,
/// regardless of the order their fields were constructed in.
pub fn fingerprint(task_type: &str, input: &Value) -> String {
    let canonical = canonicalize(input);
    let bytes = serde_json::to_vec(&canonical).expect("canonicalized JSON always serializes");

    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
