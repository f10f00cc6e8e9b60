//! Canonical JSON encoding
//!
//! Object keys are emitted in sorted order, no insignificant whitespace is
//! written, and strings use serde_json escaping. Two values that compare equal
//! always encode to the same bytes regardless of the key order or formatting
//! of the document they were parsed from.

use serde_json::Value as JsonValue;

/// Fields that never carry meaning for a release and are dropped at any depth
pub const VOLATILE_FIELDS: &[&str] = &["generated_at", "build_timestamp", "build_id", "built_at"];

/// Generate canonical JSON (sorted keys, compact)
#[must_use]
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        JsonValue::String(s) => write_string(s, out),
        JsonValue::Number(n) => out.push_str(&n.to_string()),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Null => out.push_str("null"),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&JsonValue::String(s.to_owned()).to_string());
}

/// Remove [`VOLATILE_FIELDS`] from every object in the tree
pub fn strip_volatile(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            map.retain(|key, _| !VOLATILE_FIELDS.contains(&key.as_str()));
            for child in map.values_mut() {
                strip_volatile(child);
            }
        }
        JsonValue::Array(arr) => arr.iter_mut().for_each(strip_volatile),
        _ => {}
    }
}
