//! End-to-end agent scenarios against the in-process broker.
//!
//! Each test stands up a real agent (result sockets bound to an ephemeral
//! loopback port) wired to a `MemoryTransport`, then asserts on exactly
//! what the agent published.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use vigil_agent::{Agent, AgentOptions, Extension, ExtensionRegistry, LifecycleState};
use vigil_transport::{DeliveryMode, MemoryTransport, Transport};
use vigil_types::{CheckRequest, ResultEnvelope};

const RESULTS: &str = "results";
const KEEPALIVES: &str = "keepalives";

fn base_settings() -> Value {
    json!({
        "client": {
            "name": "host1",
            "subscriptions": ["all"],
            "socket": {"port": 0}
        }
    })
}

fn build_agent(
    settings: Value,
    extensions: ExtensionRegistry,
    options: AgentOptions,
) -> (Agent, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let agent = Agent::new(
        vigil_types::Settings::new(settings),
        transport.clone(),
        extensions,
        options,
    )
    .expect("valid settings");
    (agent, transport)
}

async fn started_agent(settings: Value) -> (Agent, Arc<MemoryTransport>) {
    let (agent, transport) = build_agent(settings, ExtensionRegistry::new(), AgentOptions::default());
    agent.start().await.expect("agent starts");
    (agent, transport)
}

async fn deliver_request(transport: &MemoryTransport, request: Value) {
    transport
        .publish(
            DeliveryMode::Fanout,
            "all",
            serde_json::to_vec(&request).expect("serializable request"),
        )
        .await
        .expect("publish request");
}

fn result_envelopes(transport: &MemoryTransport) -> Vec<ResultEnvelope> {
    transport
        .published_to(RESULTS)
        .iter()
        .map(|payload| serde_json::from_slice(payload).expect("valid result envelope"))
        .collect()
}

async fn wait_for_results(transport: &MemoryTransport, count: usize) -> Vec<ResultEnvelope> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let results = result_envelopes(transport);
        if results.len() >= count {
            return results;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} results, got {}",
            results.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// --- keepalives -----------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn keepalive_published_at_start_and_every_twenty_seconds() {
    let (_agent, transport) = started_agent(base_settings()).await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    let keepalives = transport.published_to(KEEPALIVES);
    assert_eq!(keepalives.len(), 4, "expected beacons at t=0,20,40,60");

    let payload: Value = serde_json::from_slice(&keepalives[0]).unwrap();
    assert_eq!(payload["name"], json!("host1"));
    assert_eq!(payload["version"], json!(vigil_agent::VERSION));
    assert!(payload["timestamp"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn keepalives_stop_while_paused_and_restart_on_resume() {
    let (agent, transport) = started_agent(base_settings()).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    agent.pause().await;
    assert_eq!(agent.state(), LifecycleState::Paused);
    assert_eq!(agent.active_timer_count(), 0);

    let while_paused = transport.published_to(KEEPALIVES).len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.published_to(KEEPALIVES).len(), while_paused);

    agent.resume().await;
    assert_eq!(agent.state(), LifecycleState::Running);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(transport.published_to(KEEPALIVES).len() > while_paused);
}

// --- command execution ----------------------------------------------------

#[tokio::test]
async fn executes_command_with_token_substitution() {
    let mut settings = base_settings();
    settings["client"]["db"] = json!({"name": "prod"});
    let (_agent, transport) = started_agent(settings).await;

    deliver_request(
        &transport,
        json!({"name": "chk1", "command": "echo :::db.name|dev:::", "interval": 30}),
    )
    .await;

    let results = wait_for_results(&transport, 1).await;
    let envelope = &results[0];
    assert_eq!(envelope.client, "host1");
    assert_eq!(envelope.check.name, "chk1");
    assert_eq!(envelope.check.output.as_deref(), Some("prod\n"));
    assert_eq!(envelope.check.status, Some(0));
    assert!(envelope.check.executed.is_some());

    let duration = envelope.check.duration.expect("duration recorded");
    // Rounded to the nearest millisecond.
    assert_eq!((duration * 1000.0).round() / 1000.0, duration);
}

#[tokio::test]
async fn local_definition_overrides_pushed_command() {
    let mut settings = base_settings();
    settings["checks"] = json!({
        "pinned": {"command": "echo local"}
    });
    let (_agent, transport) = started_agent(settings).await;

    deliver_request(
        &transport,
        json!({"name": "pinned", "command": "echo pushed"}),
    )
    .await;

    let results = wait_for_results(&transport, 1).await;
    assert_eq!(results[0].check.output.as_deref(), Some("local\n"));
}

#[tokio::test]
async fn safe_mode_rejects_undefined_command() {
    let mut settings = base_settings();
    settings["client"]["safe_mode"] = json!(true);
    let (_agent, transport) = started_agent(settings).await;

    deliver_request(&transport, json!({"name": "x", "command": "echo hi"})).await;

    let results = wait_for_results(&transport, 1).await;
    let check = &results[0].check;
    assert_eq!(
        check.output.as_deref(),
        Some("Check is not locally defined (safe mode)")
    );
    assert_eq!(check.status, Some(3));
    assert_eq!(check.handle, Some(false));
    assert!(check.executed.is_some());
    // No subprocess ran.
    assert!(check.duration.is_none());
}

#[tokio::test]
async fn safe_mode_allows_locally_defined_command() {
    let mut settings = base_settings();
    settings["client"]["safe_mode"] = json!(true);
    settings["checks"] = json!({"blessed": {"command": "echo blessed"}});
    let (_agent, transport) = started_agent(settings).await;

    deliver_request(&transport, json!({"name": "blessed", "command": "echo hi"})).await;

    let results = wait_for_results(&transport, 1).await;
    assert_eq!(results[0].check.output.as_deref(), Some("blessed\n"));
    assert_eq!(results[0].check.status, Some(0));
}

#[tokio::test]
async fn unmatched_tokens_produce_synthetic_result() {
    let (_agent, transport) = started_agent(base_settings()).await;

    deliver_request(&transport, json!({"name": "y", "command": ":::missing:::"})).await;

    let results = wait_for_results(&transport, 1).await;
    let check = &results[0].check;
    assert_eq!(
        check.output.as_deref(),
        Some("Unmatched command tokens: missing")
    );
    assert_eq!(check.status, Some(3));
    assert_eq!(check.handle, Some(false));
    assert!(check.duration.is_none());
}

#[tokio::test]
async fn duplicate_in_flight_check_is_suppressed() {
    let (agent, transport) = started_agent(base_settings()).await;

    let request = json!({"name": "slow", "command": "sleep 0.3"});
    deliver_request(&transport, request.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.in_progress_count(), 1);
    deliver_request(&transport, request.clone()).await;

    // First execution completes; the duplicate was dropped.
    let results = wait_for_results(&transport, 1).await;
    assert_eq!(results.len(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(result_envelopes(&transport).len(), 1);

    // A third request after completion runs normally.
    deliver_request(&transport, request).await;
    let results = wait_for_results(&transport, 2).await;
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn undecodable_request_is_dropped_without_breaking_the_stream() {
    let (_agent, transport) = started_agent(base_settings()).await;

    transport
        .publish(DeliveryMode::Fanout, "all", b"not json at all".to_vec())
        .await
        .unwrap();
    deliver_request(&transport, json!({"name": "after", "command": "echo ok"})).await;

    let results = wait_for_results(&transport, 1).await;
    assert_eq!(results[0].check.name, "after");
}

// --- extensions -----------------------------------------------------------

struct UptimeProbe;

#[async_trait]
impl Extension for UptimeProbe {
    fn name(&self) -> &str {
        "uptime_probe"
    }

    async fn safe_run(&self, _check: &CheckRequest) -> (String, i64) {
        ("up 1 day".into(), 0)
    }
}

#[tokio::test]
async fn extension_check_runs_and_publishes() {
    let mut extensions = ExtensionRegistry::new();
    extensions.register(Arc::new(UptimeProbe));
    let (agent, transport) = build_agent(base_settings(), extensions, AgentOptions::default());
    agent.start().await.unwrap();

    deliver_request(&transport, json!({"name": "uptime_probe"})).await;

    let results = wait_for_results(&transport, 1).await;
    let check = &results[0].check;
    assert_eq!(check.output.as_deref(), Some("up 1 day"));
    assert_eq!(check.status, Some(0));
    assert!(check.executed.is_some());
}

#[tokio::test]
async fn unknown_extension_is_dropped_silently_to_the_server() {
    let (_agent, transport) = started_agent(base_settings()).await;

    deliver_request(&transport, json!({"name": "ghost"})).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(result_envelopes(&transport).is_empty());
}

// --- standalone scheduling ------------------------------------------------

#[tokio::test]
async fn standalone_checks_fire_on_their_own() {
    let mut settings = base_settings();
    settings["checks"] = json!({
        "beat": {"command": "echo beat", "interval": 300, "standalone": true}
    });
    let (agent, transport) = build_agent(
        settings,
        ExtensionRegistry::new(),
        AgentOptions { test_mode: true },
    );
    agent.start().await.unwrap();

    // Test mode collapses splay to zero and the interval to 500 ms.
    let results = wait_for_results(&transport, 2).await;
    for envelope in &results {
        assert_eq!(envelope.check.name, "beat");
        assert_eq!(envelope.check.output.as_deref(), Some("beat\n"));
        assert!(envelope.check.issued.is_some());
    }
}

// --- local result sockets -------------------------------------------------

#[tokio::test]
async fn tcp_socket_accepts_results_and_answers_ping() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (agent, transport) = started_agent(base_settings()).await;
    let addr = agent.socket_addr().expect("sockets bound");

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"ping\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("pong"));

    writer
        .write_all(b"{\"name\":\"app_health\",\"output\":\"healthy\",\"status\":0}\n")
        .await
        .unwrap();

    let results = wait_for_results(&transport, 1).await;
    let envelope = &results[0];
    assert_eq!(envelope.client, "host1");
    assert_eq!(envelope.check.name, "app_health");
    assert_eq!(envelope.check.status, Some(0));
    assert!(envelope.check.executed.is_some(), "executed stamped on injection");
}

#[tokio::test]
async fn udp_socket_accepts_result_datagrams() {
    let (agent, transport) = started_agent(base_settings()).await;
    let addr = agent.socket_addr().expect("sockets bound");

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(
            br#"{"name":"batch_job","output":"done","status":1}"#,
            addr,
        )
        .await
        .unwrap();

    let results = wait_for_results(&transport, 1).await;
    assert_eq!(results[0].check.name, "batch_job");
    assert_eq!(results[0].check.status, Some(1));
}

#[tokio::test]
async fn invalid_socket_payload_is_dropped() {
    let (agent, transport) = started_agent(base_settings()).await;
    let addr = agent.socket_addr().expect("sockets bound");

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    // Missing status: must never be published.
    socket
        .send_to(br#"{"name":"incomplete","output":"?"}"#, addr)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(result_envelopes(&transport).is_empty());
}

// --- lifecycle ------------------------------------------------------------

#[tokio::test]
async fn pause_is_idempotent_and_clears_timers() {
    let (agent, _transport) = started_agent(base_settings()).await;
    assert!(agent.active_timer_count() >= 2, "keepalive + subscription");

    agent.pause().await;
    assert_eq!(agent.state(), LifecycleState::Paused);
    assert_eq!(agent.active_timer_count(), 0);

    agent.pause().await;
    assert_eq!(agent.state(), LifecycleState::Paused);
}

#[tokio::test]
async fn stop_drains_in_flight_work_before_closing() {
    let (agent, transport) = started_agent(base_settings()).await;

    deliver_request(&transport, json!({"name": "slow", "command": "sleep 0.5"})).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(agent.in_progress_count(), 1);

    agent.stop().await;

    assert_eq!(agent.state(), LifecycleState::Stopped);
    assert_eq!(agent.in_progress_count(), 0);
    assert_eq!(agent.active_timer_count(), 0);
    assert_eq!(agent.socket_handle_count(), 0);
    assert!(!transport.is_connected());

    // The in-flight result was published before the transport closed.
    let results = result_envelopes(&transport);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].check.name, "slow");
    assert_eq!(results[0].check.status, Some(0));
}

#[tokio::test]
async fn stop_from_paused_completes_immediately() {
    let (agent, _transport) = started_agent(base_settings()).await;

    agent.pause().await;
    agent.stop().await;
    assert_eq!(agent.state(), LifecycleState::Stopped);

    // Stop is idempotent.
    agent.stop().await;
    assert_eq!(agent.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn start_fails_when_transport_is_down() {
    let (agent, transport) = build_agent(
        base_settings(),
        ExtensionRegistry::new(),
        AgentOptions::default(),
    );
    transport.disconnect();

    assert!(agent.start().await.is_err());
    assert_eq!(agent.state(), LifecycleState::Initialized);
}
