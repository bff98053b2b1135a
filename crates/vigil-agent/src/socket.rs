//! Local result sockets.
//!
//! Two always-on listeners share one address (default `127.0.0.1:3030`):
//! a TCP listener where each connection streams newline-terminated JSON
//! result payloads, and a UDP listener where each datagram is a single
//! payload. Both inject externally-produced check results into the result
//! publisher. A bare `ping` line on TCP answers `pong`, the documented
//! liveness probe for local tooling.
//!
//! Inbound traffic is unauthenticated by design; the sockets bind to
//! loopback unless configured otherwise.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_types::{CheckRequest, VigilError};

use crate::agent::AgentInner;

/// Largest accepted UDP result payload.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Handles owned by the running listeners.
///
/// Acceptor handles (the TCP accept loop and the UDP reader) are tracked
/// separately from per-connection handles so shutdown can stop the
/// servers and then close whatever connections remain.
#[derive(Default)]
pub(crate) struct SocketLedger {
    acceptors: Vec<JoinHandle<()>>,
    connections: Vec<JoinHandle<()>>,
}

impl SocketLedger {
    fn track_acceptor(&mut self, handle: JoinHandle<()>) {
        self.acceptors.push(handle);
    }

    fn track_connection(&mut self, handle: JoinHandle<()>) {
        // Finished connections have nothing left to close.
        self.connections.retain(|h| !h.is_finished());
        self.connections.push(handle);
    }

    /// Stop the servers, close remaining connections, drain the ledger.
    pub(crate) fn close_all(&mut self) {
        for acceptor in self.acceptors.drain(..) {
            acceptor.abort();
        }
        for connection in self.connections.drain(..) {
            connection.abort();
        }
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.acceptors.len() + self.connections.len()
    }
}

/// Bind the TCP and UDP listeners and start their tasks.
///
/// Errors here are fatal to agent startup.
pub(crate) async fn bind(inner: &Arc<AgentInner>) -> Result<SocketAddr, VigilError> {
    let requested = format!("{}:{}", inner.client.socket_bind, inner.client.socket_port);

    let tcp = TcpListener::bind(&requested)
        .await
        .map_err(|e| VigilError::SocketBind {
            addr: requested.clone(),
            source: e,
        })?;
    let local = tcp.local_addr().map_err(|e| VigilError::SocketBind {
        addr: requested.clone(),
        source: e,
    })?;
    // The UDP listener shares the exact address TCP resolved, which
    // matters when the configured port is 0.
    let udp = UdpSocket::bind(local)
        .await
        .map_err(|e| VigilError::SocketBind {
            addr: local.to_string(),
            source: e,
        })?;

    *inner.socket_addr.lock().expect("socket addr lock") = Some(local);
    info!(addr = %local, "result sockets listening");

    let accept_inner = Arc::clone(inner);
    let acceptor = tokio::spawn(async move {
        accept_loop(accept_inner, tcp).await;
    });
    let udp_inner = Arc::clone(inner);
    let udp_reader = tokio::spawn(async move {
        udp_loop(udp_inner, udp).await;
    });

    let mut ledger = inner.sockets.lock().expect("socket ledger lock");
    ledger.track_acceptor(acceptor);
    ledger.track_acceptor(udp_reader);

    Ok(local)
}

async fn accept_loop(inner: Arc<AgentInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "result socket connection accepted");
                let conn_inner = Arc::clone(&inner);
                let handle = tokio::spawn(async move {
                    if let Err(e) = handle_connection(conn_inner, stream).await {
                        debug!(error = %e, "result socket connection ended");
                    }
                });
                inner
                    .sockets
                    .lock()
                    .expect("socket ledger lock")
                    .track_connection(handle);
            }
            Err(e) => {
                warn!(error = %e, "result socket accept error");
            }
        }
    }
}

async fn handle_connection(inner: Arc<AgentInner>, stream: TcpStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "ping" {
            writer.write_all(b"pong\n").await?;
            continue;
        }
        inject_payload(&inner, line.as_bytes()).await;
    }
    Ok(())
}

async fn udp_loop(inner: Arc<AgentInner>, socket: UdpSocket) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                debug!(%peer, len, "result datagram received");
                inject_payload(&inner, &buf[..len]).await;
            }
            Err(e) => {
                warn!(error = %e, "result socket datagram error");
            }
        }
    }
}

/// Parse an externally-produced result and hand it to the publisher.
///
/// Invalid payloads are logged and dropped so a result without a status
/// can never be published.
async fn inject_payload(inner: &Arc<AgentInner>, payload: &[u8]) {
    match parse_result(payload) {
        Ok(mut check) => {
            if check.executed.is_none() {
                check.executed = Some(Utc::now().timestamp());
            }
            inner.publish_result(check).await;
        }
        Err(reason) => {
            warn!(
                payload = %String::from_utf8_lossy(payload),
                reason = %reason,
                "invalid result payload on socket"
            );
        }
    }
}

fn parse_result(payload: &[u8]) -> Result<CheckRequest, String> {
    let check: CheckRequest =
        serde_json::from_slice(payload).map_err(|e| format!("not a result object: {e}"))?;
    if check.output.is_none() {
        return Err("missing output".into());
    }
    if check.status.is_none() {
        return Err("missing status".into());
    }
    Ok(check)
}
