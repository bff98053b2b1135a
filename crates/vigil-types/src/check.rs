//! Check requests and result envelopes.
//!
//! A check request is either received over the transport or constructed
//! locally by the standalone scheduler. The typed fields below are the
//! ones the agent runtime interprets; every other key passes through
//! untouched via the flattened `extra` map, so server-side conventions
//! (handlers, occurrence filters, custom metadata) survive the round trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exit status conventions for check results.
///
/// Values outside this set pass through unchanged.
pub mod status {
    /// Check passed.
    pub const OK: i64 = 0;
    /// Check crossed a warning threshold.
    pub const WARNING: i64 = 1;
    /// Check crossed a critical threshold.
    pub const CRITICAL: i64 = 2;
    /// Check could not be executed or produced no verdict.
    pub const UNKNOWN: i64 = 3;
}

/// A check definition or invocation.
///
/// A request with a `command` (after merging any same-named local
/// definition) is a command check; otherwise it is an extension check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Unique check name within a host.
    pub name: String,

    /// Shell command with optional substitution tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// In-process extension name (defaults to `name` when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Scheduling interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Execution timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Whether the agent schedules this check locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone: Option<bool>,

    /// Whether the server should route this result to handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<bool>,

    /// Epoch seconds at which the request was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<i64>,

    /// Epoch seconds at which execution began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<i64>,

    /// Execution wall time in seconds, rounded to the nearest millisecond.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Combined stdout and stderr, or a synthetic message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Exit status (see [`status`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    /// Arbitrary additional keys, passed through verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl CheckRequest {
    /// Create a bare request with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            extension: None,
            interval: None,
            timeout: None,
            standalone: None,
            handle: None,
            issued: None,
            executed: None,
            duration: None,
            output: None,
            status: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Overlay a local check definition on top of this request.
    ///
    /// Every key present in `local` wins over the request's value, which
    /// lets hosts pin commands, timeouts, and metadata regardless of what
    /// the server asked for. Non-object definitions leave the request
    /// unchanged.
    pub fn merged_with_local(&self, local: &Value) -> Result<Self, serde_json::Error> {
        let Value::Object(local_map) = local else {
            return Ok(self.clone());
        };

        let mut base = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => unreachable!("a struct with named fields serializes to an object"),
        };
        for (key, value) in local_map {
            base.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(base))
    }

    /// Whether this request designates a command check.
    pub fn is_command_check(&self) -> bool {
        self.command.is_some()
    }
}

/// The envelope published to the `results` pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// The reporting client's name.
    pub client: String,
    /// The executed check, including `output`, `status`, and timing.
    pub check: CheckRequest,
    /// Optional client signature for server-side verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}
