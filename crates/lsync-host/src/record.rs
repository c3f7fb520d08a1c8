//! Record payloads and their canonical form.

use serde_json::{Map, Value};

/// One row of a collection: field name to JSON value.
pub type Record = Map<String, Value>;

/// Reserved field holding the timestamp stamped by the reconciler.
pub const TIME_FIELD: &str = "Time";

/// Serialize `value` with object keys sorted at every level.
///
/// Two values that differ only in field order produce the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Canonical form of an ordered record sequence.
pub fn canonical_records(records: &[Record]) -> String {
    let array = Value::Array(records.iter().cloned().map(Value::Object).collect());
    canonical_json(&array)
}

/// Decode a committed state as returned by the ledger.
///
/// Accepts an array of objects, a JSON string containing such an array, or
/// `null` (an empty state).
pub fn decode_records(value: Value) -> Result<Vec<Record>, String> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(encoded) => {
            if encoded.trim().is_empty() {
                return Ok(Vec::new());
            }
            let inner: Value = serde_json::from_str(&encoded)
                .map_err(|e| format!("committed state is not valid JSON: {e}"))?;
            if inner.is_string() {
                return Err("committed state is doubly string-encoded".into());
            }
            decode_records(inner)
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(format!("record {i} is not an object: {other}")),
            })
            .collect(),
        other => Err(format!("expected an array of records, got {other}")),
    }
}
