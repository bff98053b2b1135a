//! Keepalive payload assembly.
//!
//! A keepalive is the agent's liveness beacon: the client settings block
//! with `version` and `timestamp` mixed in, passed through the redactor
//! so credentials stored in client attributes never reach the fabric.
//! The cadence is fixed at 20 seconds; server-side liveness thresholds
//! assume it.

use std::time::Duration;

use serde_json::Value;

use vigil_types::{ClientSpec, Settings};

use crate::redact;

/// Pipe keepalives are published to, always with direct delivery.
pub const KEEPALIVES_PIPE: &str = "keepalives";

/// Fixed keepalive cadence. Not configurable.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Build the redacted keepalive payload.
pub fn build_payload(
    settings: &Settings,
    client: &ClientSpec,
    version: &str,
    timestamp: i64,
) -> Value {
    let mut payload = settings.client_value();
    if let Value::Object(map) = &mut payload {
        map.insert("version".into(), Value::String(version.to_string()));
        map.insert("timestamp".into(), Value::Number(timestamp.into()));
    }

    let keys: Vec<&str> = match &client.redact {
        Some(list) => list.iter().map(String::as_str).collect(),
        None => redact::DEFAULT_SENSITIVE_KEYS.to_vec(),
    };
    redact::redact(&payload, &keys)
}
