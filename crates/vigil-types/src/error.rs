//! Error types shared across all Vigil crates.

/// Errors that can occur across the agent runtime.
///
/// Each variant corresponds to a different subsystem: configuration,
/// transport, local result sockets, or payload decoding.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// Settings are missing a required key or carry a malformed value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport connection or publish failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Binding the local result sockets failed. Fatal at startup.
    #[error("failed to bind result socket on {addr}: {source}")]
    SocketBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A payload could not be decoded as a text object.
    #[error("payload decode error: {0}")]
    Decode(String),
}
