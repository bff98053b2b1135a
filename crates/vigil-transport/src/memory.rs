//! In-process broker with full pipe/funnel semantics.
//!
//! Backs the loopback run mode and the agent's integration tests. Every
//! publish is also recorded so tests can assert on exactly what the agent
//! emitted without racing the delivery path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{DeliveryMode, Transport, TransportError};

/// Buffered payloads per consumer before the broker drops messages.
const CONSUMER_BUFFER: usize = 64;

/// A recorded publish, kept for test inspection.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    /// Delivery pattern the publisher asked for.
    pub mode: DeliveryMode,
    /// Destination pipe.
    pub pipe: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

struct Funnel {
    consumers: Vec<mpsc::Sender<Vec<u8>>>,
    /// Round-robin cursor over `consumers`.
    next: usize,
}

impl Funnel {
    fn new() -> Self {
        Self {
            consumers: Vec::new(),
            next: 0,
        }
    }

    /// Hand one payload to the next live consumer in rotation.
    fn deliver(&mut self, payload: Vec<u8>) {
        self.consumers.retain(|tx| !tx.is_closed());
        if self.consumers.is_empty() {
            return;
        }
        self.next %= self.consumers.len();
        // A full consumer loses the message; best-effort delivery.
        let _ = self.consumers[self.next].try_send(payload);
        self.next = (self.next + 1) % self.consumers.len();
    }
}

#[derive(Default)]
struct BrokerState {
    /// pipe -> funnel -> consumers.
    bindings: HashMap<String, HashMap<String, Funnel>>,
    published: Vec<PublishedMessage>,
}

/// An in-process [`Transport`].
///
/// Distinct funnels bound to one pipe each receive a copy of every
/// publish; consumers sharing a funnel take turns. There is no wire
/// format and no network: payloads move through bounded tokio channels.
pub struct MemoryTransport {
    state: Mutex<BrokerState>,
    connected: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Every publish recorded so far, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().expect("broker lock").published.clone()
    }

    /// Recorded payloads published to one pipe, in order.
    pub fn published_to(&self, pipe: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .expect("broker lock")
            .published
            .iter()
            .filter(|m| m.pipe == pipe)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Forget recorded publishes (delivered messages are unaffected).
    pub fn clear_published(&self) {
        self.state.lock().expect("broker lock").published.clear();
    }

    /// Number of funnels currently bound to a pipe.
    pub fn funnel_count(&self, pipe: &str) -> usize {
        self.state
            .lock()
            .expect("broker lock")
            .bindings
            .get(pipe)
            .map(|funnels| funnels.len())
            .unwrap_or(0)
    }

    /// Simulate a broker outage: publishes fail until `reconnect`.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Restore connectivity after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        mode: DeliveryMode,
        pipe: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut state = self.state.lock().expect("broker lock");
        state.published.push(PublishedMessage {
            mode,
            pipe: pipe.to_string(),
            payload: payload.clone(),
        });

        if let Some(funnels) = state.bindings.get_mut(pipe) {
            for funnel in funnels.values_mut() {
                funnel.deliver(payload.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        mode: DeliveryMode,
        pipe: &str,
        funnel: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let mut state = self.state.lock().expect("broker lock");
        state
            .bindings
            .entry(pipe.to_string())
            .or_default()
            .entry(funnel.to_string())
            .or_insert_with(Funnel::new)
            .consumers
            .push(tx);

        debug!(%mode, pipe, funnel, "funnel bound");
        Ok(rx)
    }

    async fn unsubscribe_all(&self) {
        self.state.lock().expect("broker lock").bindings.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.state.lock().expect("broker lock").bindings.clear();
    }
}
