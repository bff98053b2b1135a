//! Message transport seam for the Vigil agent.
//!
//! A [`Transport`] implementation handles one broker backend. The agent
//! publishes keepalives and check results through [`Transport::publish`]
//! and receives check requests by subscribing a pipe/funnel pair with
//! [`Transport::subscribe`]. Delivery is best-effort: publish errors are
//! surfaced once to the caller and never retried, and the transport never
//! acknowledges or rejects inbound messages.
//!
//! [`MemoryTransport`] is the in-process broker used by the loopback run
//! mode and the agent's integration tests.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryTransport, PublishedMessage};

/// How a published message is delivered to funnels bound on a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Deliver to the funnel matching the pipe name.
    Direct,
    /// Deliver a copy to every funnel bound to the pipe.
    Fanout,
    /// Deliver to one consumer of the bound funnel in rotation.
    RoundRobin,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Fanout => write!(f, "fanout"),
            Self::RoundRobin => write!(f, "roundrobin"),
        }
    }
}

/// Errors from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport connection is closed or was never established.
    #[error("transport is not connected")]
    NotConnected,

    /// A subscription could not be established.
    #[error("subscribe failed for pipe {pipe:?}: {reason}")]
    Subscribe { pipe: String, reason: String },

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// A broker-style publish/subscribe transport.
///
/// Implementations deliver each subscribed message at most once per
/// funnel. Distinct funnels bound to one pipe receive independent copies;
/// multiple consumers of the same funnel share it round-robin.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload to a named pipe.
    ///
    /// Fire-and-forget: an `Err` means the message was not handed to the
    /// broker, and the caller decides whether that is worth logging.
    async fn publish(
        &self,
        mode: DeliveryMode,
        pipe: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Bind a funnel to a pipe and return the consumer end.
    ///
    /// The receiver yields raw payloads until the subscription is torn
    /// down by [`unsubscribe_all`](Transport::unsubscribe_all) or
    /// [`close`](Transport::close).
    async fn subscribe(
        &self,
        mode: DeliveryMode,
        pipe: &str,
        funnel: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Tear down every subscription created through this handle.
    async fn unsubscribe_all(&self);

    /// Whether the transport currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// Close the connection. Further publishes fail with `NotConnected`.
    async fn close(&self);
}
