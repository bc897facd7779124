//! Deterministic string form used for both fingerprinting and data hashing.
//!
//! The subscribe-time baseline hash and every later change-detection hash
//! MUST use the same canonicalization, or narrow subscriptions would see
//! spurious `data changed` pushes whenever an equivalent-but-differently-
//! ordered document comes back from the store.

use sha1::{Digest, Sha1};

/// Hex-encode the SHA-1 digest of `input`. Shared by fingerprinting (hashing
/// a colon-joined descriptor string) and data hashing (hashing a canonical
/// JSON rendering of a resolved slice).
pub fn sha1_hex(input: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Render a `serde_json::Value` into a single deterministic string: object
/// keys sorted lexicographically, arrays in original order, numbers and
/// strings via their canonical JSON forms, `null` spelled out explicitly.
///
/// This does not rely on `serde_json`'s default `BTreeMap`-backed object
/// ordering (which would silently change if the `preserve_order` feature
/// were ever enabled on this crate) -- it sorts explicitly.
pub fn canonical_string(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Hash of the canonical rendering of a resolved slice -- the per-session
/// `data_hash` used to suppress no-op notifications.
pub fn data_hash(value: &serde_json::Value) -> String {
    sha1_hex(canonical_string(value).as_bytes())
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string always serializes"));
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string always serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys_regardless_of_insertion_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_eq!(canonical_string(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn nested_objects_and_arrays_sort_recursively() {
        let v = json!({"z": [1, {"y": 1, "x": 2}], "a": null});
        assert_eq!(canonical_string(&v), r#"{"a":null,"z":[1,{"x":2,"y":1}]}"#);
    }

    #[test]
    fn data_hash_is_stable_and_order_independent() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(data_hash(&a), data_hash(&b));
    }

    #[test]
    fn data_hash_changes_when_value_changes() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(data_hash(&a), data_hash(&b));
    }

    #[test]
    fn sha1_hex_is_forty_lowercase_hex_chars() {
        let digest = sha1_hex(b"hello");
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
