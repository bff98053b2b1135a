//! Vigil agent: host-side monitoring runtime.
//!
//! The agent announces itself to a central monitoring fabric with
//! periodic keepalives, receives or self-schedules check requests, runs
//! them as local subprocesses or in-process extensions, and publishes the
//! results back through the message transport. It also accepts
//! externally-produced results on local TCP/UDP sockets.
//!
//! # Architecture
//!
//! - [`agent::Agent`]: lifecycle controller and serialized runtime core
//! - [`keepalive`]: liveness beacon payloads (fixed 20 s cadence)
//! - [`subscriptions`]: subscription-to-transport binding rules
//! - [`schedule`]: standalone check selection and deterministic splay
//! - [`template`]: command token substitution
//! - [`spawn`]: bounded subprocess execution
//! - [`extension`]: in-process check runners
//! - [`publish`]: result envelopes, fire-and-forget
//! - [`redact`]: sensitive-key masking

pub mod agent;
pub mod extension;
pub mod keepalive;
pub mod publish;
pub mod redact;
pub mod schedule;
mod socket;
pub mod spawn;
pub mod subscriptions;
pub mod template;

pub use agent::{Agent, AgentOptions, LifecycleState};
pub use extension::{Extension, ExtensionRegistry};

/// Agent version advertised in keepalives and fanout funnel names.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
