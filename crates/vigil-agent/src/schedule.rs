//! Standalone check selection and splay computation.
//!
//! Standalone checks are scheduled by the agent itself instead of waiting
//! for server-pushed requests. To keep a fleet of agents from firing the
//! same check simultaneously, each check's first execution is delayed by a
//! deterministic per-check offset derived from the client and check names.

use std::time::Duration;

use md5::{Digest, Md5};
use serde_json::Value;
use tracing::warn;

use vigil_types::{CheckRequest, Settings};

use crate::extension::ExtensionRegistry;

/// Interval substituted for every standalone check in test mode.
pub const TEST_INTERVAL: Duration = Duration::from_millis(500);

/// Select the checks the agent schedules locally.
///
/// Local check definitions qualify with `standalone: true` and an integer
/// `interval`; registered extensions qualify the same way through their
/// own definitions. Definitions that do not parse are skipped with a
/// warning rather than aborting the schedule.
pub fn standalone_checks(
    settings: &Settings,
    extensions: &ExtensionRegistry,
) -> Vec<CheckRequest> {
    let mut selected = Vec::new();

    for (name, definition) in settings.checks() {
        if let Some(check) = parse_definition(name, definition) {
            if check.standalone == Some(true) && check.interval.is_some() {
                selected.push(check);
            }
        }
    }

    for definition in extensions.definitions() {
        let name = definition
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(check) = parse_definition(&name, &definition) {
            if check.standalone == Some(true) && check.interval.is_some() {
                selected.push(check);
            }
        }
    }

    selected
}

fn parse_definition(name: &str, definition: &Value) -> Option<CheckRequest> {
    if name.is_empty() {
        return None;
    }
    let mut value = definition.clone();
    if let Value::Object(map) = &mut value {
        map.entry("name".to_string())
            .or_insert_with(|| Value::String(name.to_string()));
    }
    match serde_json::from_value(value) {
        Ok(check) => Some(check),
        Err(e) => {
            warn!(check = name, error = %e, "unschedulable check definition");
            None
        }
    }
}

/// The deterministic start offset for a standalone check.
///
/// `(H(client ":" check) - now_ms) mod interval_ms`, where `H` is the low
/// 64 bits of the MD5 digest read little-endian. The result lies in
/// `[0, interval)` and depends only on the two names and wall-clock time,
/// so the schedule is stable across agent restarts. MD5 is not used for
/// security here; the digest choice is part of the observable schedule.
pub fn splay(client_name: &str, check_name: &str, interval: Duration, now_ms: u64) -> Duration {
    let interval_ms = interval.as_millis() as u64;
    if interval_ms == 0 {
        return Duration::ZERO;
    }

    let mut hasher = Md5::new();
    hasher.update(client_name.as_bytes());
    hasher.update(b":");
    hasher.update(check_name.as_bytes());
    let digest = hasher.finalize();
    let low: [u8; 8] = digest[..8].try_into().expect("md5 digest is 16 bytes");
    let hash = u64::from_le_bytes(low);

    let offset_ms = ((hash % interval_ms) + interval_ms - (now_ms % interval_ms)) % interval_ms;
    Duration::from_millis(offset_ms)
}
