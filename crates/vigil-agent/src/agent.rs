//! Agent lifecycle controller and runtime.
//!
//! The agent interleaves periodic keepalives, subscription-driven inbound
//! check requests, self-scheduled standalone checks, bounded subprocess
//! execution, and two always-on local result sockets, under a controlled
//! pause/resume/stop lifecycle that drains in-flight work before exit.
//!
//! # Concurrency model
//!
//! Everything the runtime mutates lives in three ledgers owned by
//! [`AgentInner`]: the in-progress set (check names with an active command
//! execution), the run-timer ledger (abortable task handles for keepalive,
//! subscription consumers, and standalone timers), and the socket ledger.
//! Each is guarded by a `std::sync::Mutex` that is never held across an
//! await, so every callback observes and mutates a serialized view.
//!
//! Command subprocesses deliberately run in untracked tasks: pausing the
//! agent cancels timers and subscriptions but lets in-flight executions
//! finish, and stop waits for the in-progress set to drain before closing
//! anything.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vigil_transport::{DeliveryMode, Transport};
use vigil_types::{check::status, CheckRequest, ClientSpec, Settings, VigilError};

use crate::extension::ExtensionRegistry;
use crate::socket::{self, SocketLedger};
use crate::{keepalive, publish, schedule, subscriptions, template};

/// Poll granularity while waiting for in-flight checks to drain on stop.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// Poll period while waiting to resume after a transport outage.
const RESUME_POLL: Duration = Duration::from_secs(1);

/// Where the agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Running,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runtime knobs that are external inputs rather than settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentOptions {
    /// Collapse standalone splay to zero and every standalone interval to
    /// 500 ms, so scheduling behavior is observable in seconds instead of
    /// minutes.
    pub test_mode: bool,
}

/// The monitoring agent.
///
/// Cheap to clone handles are not exposed; the agent is created once,
/// started once, and driven through `pause`/`resume`/`stop`.
pub struct Agent {
    inner: Arc<AgentInner>,
}

pub(crate) struct AgentInner {
    pub(crate) settings: Settings,
    pub(crate) client: ClientSpec,
    /// The raw client block, the root for command token substitution.
    pub(crate) client_attributes: Value,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) extensions: ExtensionRegistry,
    pub(crate) options: AgentOptions,
    /// Start time, part of the per-process fanout funnel name.
    pub(crate) start_epoch: i64,
    state: Mutex<LifecycleState>,
    in_progress: Mutex<HashSet<String>>,
    /// Signaled whenever the in-progress set empties.
    idle: Notify,
    timers: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) sockets: Mutex<SocketLedger>,
    pub(crate) socket_addr: Mutex<Option<SocketAddr>>,
}

impl Agent {
    /// Create an agent from settings and its collaborators.
    ///
    /// Fails when the client identity is missing or malformed.
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        extensions: ExtensionRegistry,
        options: AgentOptions,
    ) -> Result<Self, VigilError> {
        let client = ClientSpec::from_settings(&settings)?;
        let client_attributes = settings.client_value();

        Ok(Self {
            inner: Arc::new(AgentInner {
                settings,
                client,
                client_attributes,
                transport,
                extensions,
                options,
                start_epoch: Utc::now().timestamp(),
                state: Mutex::new(LifecycleState::Initialized),
                in_progress: Mutex::new(HashSet::new()),
                idle: Notify::new(),
                timers: Mutex::new(Vec::new()),
                sockets: Mutex::new(SocketLedger::default()),
                socket_addr: Mutex::new(None),
            }),
        })
    }

    /// Start the agent: verify the transport, bind the result sockets,
    /// and bootstrap. A socket bind failure is fatal and the agent never
    /// enters `Running`.
    pub async fn start(&self) -> Result<(), VigilError> {
        if !self.inner.transport.is_connected() {
            return Err(VigilError::Transport("transport is not connected".into()));
        }
        socket::bind(&self.inner).await?;
        self.inner.bootstrap().await;
        Ok(())
    }

    /// Cancel timers and tear down subscriptions without touching
    /// in-flight executions or the sockets. Idempotent.
    pub async fn pause(&self) {
        self.inner.pause().await;
    }

    /// Poll once a second until the agent is paused and the transport is
    /// connected again, then bootstrap.
    pub async fn resume(&self) {
        self.inner.resume().await;
    }

    /// Pause, drain in-flight executions, close sockets and transport.
    /// Returns once the agent is fully stopped.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle_state()
    }

    /// The bound address of the local result sockets, once started.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        *self.inner.socket_addr.lock().expect("socket addr lock")
    }

    /// Number of live entries in the run-timer ledger.
    pub fn active_timer_count(&self) -> usize {
        self.inner.timers.lock().expect("timer ledger lock").len()
    }

    /// Number of command checks currently executing.
    pub fn in_progress_count(&self) -> usize {
        self.inner.in_progress.lock().expect("in-progress lock").len()
    }

    /// Number of handles in the socket ledger.
    pub fn socket_handle_count(&self) -> usize {
        self.inner
            .sockets
            .lock()
            .expect("socket ledger lock")
            .handle_count()
    }
}

impl AgentInner {
    pub(crate) fn lifecycle_state(&self) -> LifecycleState {
        *self.state.lock().expect("state lock")
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().expect("state lock");
        debug!(from = %*state, to = %next, "lifecycle transition");
        *state = next;
    }

    /// Schedule keepalives, establish subscriptions, schedule standalone
    /// checks, and enter `Running`. Safe on a fresh or paused agent;
    /// resume reuses it.
    async fn bootstrap(self: &Arc<Self>) {
        info!(
            client = %self.client.name,
            version = crate::VERSION,
            "bootstrapping agent"
        );
        self.schedule_keepalives();
        self.setup_subscriptions().await;
        self.schedule_standalone_checks();
        self.set_state(LifecycleState::Running);
    }

    fn track_timer(&self, handle: JoinHandle<()>) {
        self.timers.lock().expect("timer ledger lock").push(handle);
    }

    /// Publish one keepalive immediately, then every 20 seconds.
    fn schedule_keepalives(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.track_timer(tokio::spawn(async move {
            loop {
                inner.publish_keepalive().await;
                tokio::time::sleep(keepalive::KEEPALIVE_INTERVAL).await;
            }
        }));
    }

    async fn publish_keepalive(&self) {
        let payload = keepalive::build_payload(
            &self.settings,
            &self.client,
            crate::VERSION,
            Utc::now().timestamp(),
        );
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize keepalive");
                return;
            }
        };

        debug!("publishing keepalive");
        if let Err(e) = self
            .transport
            .publish(DeliveryMode::Direct, keepalive::KEEPALIVES_PIPE, bytes)
            .await
        {
            error!(error = %e, "failed to publish keepalive");
        }
    }

    /// Bind a consumer for every configured subscription.
    async fn setup_subscriptions(self: &Arc<Self>) {
        for subscription in &self.client.subscriptions {
            let binding = subscriptions::binding_for(
                subscription,
                &self.client.name,
                crate::VERSION,
                self.start_epoch,
            );
            info!(
                subscription = %subscription,
                pipe = %binding.pipe,
                funnel = %binding.funnel,
                "subscribing to check requests"
            );

            let rx = match self
                .transport
                .subscribe(binding.mode, &binding.pipe, &binding.funnel)
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    error!(subscription = %subscription, error = %e, "failed to subscribe");
                    continue;
                }
            };

            let inner = Arc::clone(self);
            self.track_timer(tokio::spawn(async move {
                inner.consume_requests(rx).await;
            }));
        }
    }

    /// Drain one subscription in arrival order.
    async fn consume_requests(self: &Arc<Self>, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(payload) = rx.recv().await {
            match serde_json::from_slice::<CheckRequest>(&payload) {
                Ok(check) => self.process_request(check).await,
                Err(e) => {
                    warn!(
                        payload = %String::from_utf8_lossy(&payload),
                        error = %e,
                        "failed to decode check request"
                    );
                }
            }
        }
    }

    /// Install a splayed periodic timer for every standalone check.
    fn schedule_standalone_checks(self: &Arc<Self>) {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;

        for check in schedule::standalone_checks(&self.settings, &self.extensions) {
            let Some(interval_secs) = check.interval else {
                continue;
            };

            let (splay, interval) = if self.options.test_mode {
                (Duration::ZERO, schedule::TEST_INTERVAL)
            } else {
                let interval = Duration::from_secs(interval_secs);
                (
                    schedule::splay(&self.client.name, &check.name, interval, now_ms),
                    interval,
                )
            };

            debug!(
                check = %check.name,
                splay_ms = splay.as_millis() as u64,
                interval_s = interval.as_secs_f64(),
                "scheduling standalone check"
            );

            let inner = Arc::clone(self);
            self.track_timer(tokio::spawn(async move {
                tokio::time::sleep(splay).await;
                loop {
                    let mut request = check.clone();
                    request.issued = Some(Utc::now().timestamp());
                    inner.process_request(request).await;
                    tokio::time::sleep(interval).await;
                }
            }));
        }
    }

    /// Route one check request: merge any local definition, enforce safe
    /// mode, and hand off to the command executor or extension runner.
    pub(crate) async fn process_request(self: &Arc<Self>, check: CheckRequest) {
        debug!(check = %check.name, "processing check request");

        let local = self.settings.check_definition(&check.name);
        let locally_defined = local.is_some();
        let check = match local {
            Some(definition) => match check.merged_with_local(definition) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(
                        check = %check.name,
                        error = %e,
                        "local check definition does not merge with request"
                    );
                    return;
                }
            },
            None => check,
        };

        if check.is_command_check() {
            if self.client.safe_mode && !locally_defined {
                let mut check = check;
                check.output = Some("Check is not locally defined (safe mode)".into());
                check.status = Some(status::UNKNOWN);
                check.handle = Some(false);
                check.executed = Some(Utc::now().timestamp());
                self.publish_result(check).await;
                return;
            }
            self.execute_command(check).await;
        } else {
            self.run_extension(check).await;
        }
    }

    /// Execute a command check, at most one per name at a time.
    async fn execute_command(self: &Arc<Self>, mut check: CheckRequest) {
        {
            let mut in_progress = self.in_progress.lock().expect("in-progress lock");
            if in_progress.contains(&check.name) {
                warn!(check = %check.name, "previous command execution still in progress");
                return;
            }
            in_progress.insert(check.name.clone());
        }

        let raw_command = check.command.clone().unwrap_or_default();
        let (command, unmatched) = template::substitute(&raw_command, &self.client_attributes);
        if !unmatched.is_empty() {
            check.output = Some(format!(
                "Unmatched command tokens: {}",
                unmatched.join(", ")
            ));
            check.status = Some(status::UNKNOWN);
            check.handle = Some(false);
            let name = check.name.clone();
            self.publish_result(check).await;
            self.finish_check(&name);
            return;
        }

        check.executed = Some(Utc::now().timestamp());
        let inner = Arc::clone(self);
        // Deliberately untracked: in-flight executions survive pause and
        // are only waited on by the stop drain.
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = crate::spawn::run_command(&command, check.timeout).await;

            let mut check = check;
            check.duration = Some(round_to_millis(started.elapsed()));
            check.output = Some(outcome.output);
            check.status = Some(outcome.status);

            let name = check.name.clone();
            inner.publish_result(check).await;
            inner.finish_check(&name);
        });
    }

    /// Run an extension check in-loop; extensions are expected to return
    /// promptly and errors raised inside them are their own concern.
    async fn run_extension(&self, mut check: CheckRequest) {
        let extension_name = check
            .extension
            .clone()
            .unwrap_or_else(|| check.name.clone());
        let Some(extension) = self.extensions.get(&extension_name) else {
            warn!(
                check = %check.name,
                extension = %extension_name,
                "unknown check extension"
            );
            return;
        };

        check.executed = Some(Utc::now().timestamp());
        let (output, status) = extension.safe_run(&check).await;
        check.output = Some(output);
        check.status = Some(status);
        self.publish_result(check).await;
    }

    pub(crate) async fn publish_result(&self, check: CheckRequest) {
        publish::publish_result(self.transport.as_ref(), &self.client, check).await;
    }

    fn finish_check(&self, name: &str) {
        let mut in_progress = self.in_progress.lock().expect("in-progress lock");
        in_progress.remove(name);
        if in_progress.is_empty() {
            self.idle.notify_waiters();
        }
    }

    async fn pause(&self) {
        {
            let mut state = self.state.lock().expect("state lock");
            if matches!(*state, LifecycleState::Pausing | LifecycleState::Paused) {
                return;
            }
            *state = LifecycleState::Pausing;
        }
        info!("pausing agent");

        let timers: Vec<JoinHandle<()>> = self
            .timers
            .lock()
            .expect("timer ledger lock")
            .drain(..)
            .collect();
        for timer in &timers {
            timer.abort();
        }

        self.transport.unsubscribe_all().await;
        self.set_state(LifecycleState::Paused);
    }

    async fn resume(self: &Arc<Self>) {
        let mut poll = tokio::time::interval(RESUME_POLL);
        loop {
            poll.tick().await;
            match self.lifecycle_state() {
                LifecycleState::Paused if self.transport.is_connected() => {
                    self.bootstrap().await;
                    return;
                }
                LifecycleState::Paused | LifecycleState::Pausing => {}
                // Another transition won the race; nothing to resume.
                _ => return,
            }
        }
    }

    async fn stop(self: &Arc<Self>) {
        if matches!(
            self.lifecycle_state(),
            LifecycleState::Stopping | LifecycleState::Stopped
        ) {
            return;
        }
        warn!("stopping agent");

        self.pause().await;
        self.set_state(LifecycleState::Stopping);
        self.drain_in_progress().await;

        self.sockets.lock().expect("socket ledger lock").close_all();
        self.transport.close().await;
        self.set_state(LifecycleState::Stopped);
        info!("agent stopped");
    }

    /// Wait until the in-progress set is empty, waking on completions and
    /// re-checking every 500 ms regardless.
    async fn drain_in_progress(&self) {
        loop {
            let remaining = self.in_progress.lock().expect("in-progress lock").len();
            if remaining == 0 {
                return;
            }
            debug!(remaining, "waiting for in-flight check executions");
            let _ = tokio::time::timeout(DRAIN_POLL, self.idle.notified()).await;
        }
    }
}

/// Elapsed wall time in seconds, rounded to the nearest millisecond.
fn round_to_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
