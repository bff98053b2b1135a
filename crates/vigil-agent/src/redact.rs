//! Sensitive-key masking for keepalive payloads.

use serde_json::Value;

/// Keys masked when the client does not configure its own list.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pass",
    "api_key",
    "api_token",
    "access_key",
    "secret_key",
    "private_key",
    "secret",
];

/// Replacement written over masked values.
pub const MASK: &str = "REDACTED";

/// Return a copy of `value` with every sensitive key masked.
///
/// Matching is exact on key names and applies recursively through nested
/// objects and arrays, so credentials buried anywhere in custom client
/// attributes are caught. Masking is idempotent.
pub fn redact(value: &Value, keys: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut masked = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                if keys.contains(&key.as_str()) {
                    masked.insert(key.clone(), Value::String(MASK.to_string()));
                } else {
                    masked.insert(key.clone(), redact(inner, keys));
                }
            }
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| redact(item, keys)).collect()),
        other => other.clone(),
    }
}
