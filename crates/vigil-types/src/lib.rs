//! Core types shared across the Vigil agent crates.
//!
//! Defines check requests and result envelopes, the read-only settings
//! tree, the parsed client identity, and the shared error type used by
//! the transport layer and the agent runtime.

pub mod check;
pub mod error;
pub mod settings;

pub use check::{status, CheckRequest, ResultEnvelope};
pub use error::VigilError;
pub use settings::{ClientSpec, Settings, DEFAULT_SOCKET_BIND, DEFAULT_SOCKET_PORT};
