//! Bounded subprocess execution for command checks.
//!
//! Commands run through `sh -c` with stdout and stderr captured into one
//! buffer. Capture runs concurrently with the wait, so a timed-out
//! command keeps whatever it had already written; the child is killed and
//! reported as critical rather than left to hang the check slot.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;

use vigil_types::check::status;

/// Exit status reported for a timed-out command.
pub const TIMEOUT_STATUS: i64 = status::CRITICAL;

/// How long the capture tasks get to drain the pipes once the child is
/// gone. Guards against grandchildren that inherit the pipes and linger.
const CAPTURE_GRACE: Duration = Duration::from_millis(250);

/// The captured outcome of one command execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnOutcome {
    /// Combined stdout and stderr (plus a runner-synthesized message for
    /// timeouts and spawn failures).
    pub output: String,
    /// Process exit status, or the timeout/spawn-failure code.
    pub status: i64,
}

/// Run `command` through the shell, waiting at most `timeout` seconds.
///
/// Never returns an error: spawn failures and timeouts are folded into
/// the outcome so every execution produces a publishable result. On
/// timeout the partial output captured so far is kept, with
/// `"Execution timed out"` appended.
pub async fn run_command(command: &str, timeout: Option<f64>) -> SpawnOutcome {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return SpawnOutcome {
                output: format!("Unexpected error: {e}"),
                status: status::UNKNOWN,
            }
        }
    };

    // Drain both pipes concurrently with the wait so buffered output
    // survives a timeout kill.
    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = capture_stream(child.stdout.take(), Arc::clone(&stdout_buf));
    let stderr_task = capture_stream(child.stderr.take(), Arc::clone(&stderr_buf));

    let waited = match timeout {
        Some(secs) if secs > 0.0 => {
            match tokio::time::timeout(Duration::from_secs_f64(secs), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = child.kill().await;
                    settle_capture(stdout_task).await;
                    settle_capture(stderr_task).await;

                    let mut output = combined_output(&stdout_buf, &stderr_buf);
                    output.push_str("Execution timed out");
                    return SpawnOutcome {
                        output,
                        status: TIMEOUT_STATUS,
                    };
                }
            }
        }
        _ => child.wait().await,
    };

    settle_capture(stdout_task).await;
    settle_capture(stderr_task).await;
    let output = combined_output(&stdout_buf, &stderr_buf);

    match waited {
        Ok(exit) => {
            let code = match exit.code() {
                Some(code) => i64::from(code),
                // Terminated by a signal.
                None => status::UNKNOWN,
            };
            SpawnOutcome {
                output,
                status: code,
            }
        }
        Err(e) => SpawnOutcome {
            output: format!("Unexpected error: {e}"),
            status: status::UNKNOWN,
        },
    }
}

/// Stream a child pipe into a shared buffer as the process runs.
fn capture_stream<R>(reader: Option<R>, buffer: Arc<Mutex<Vec<u8>>>) -> Option<JoinHandle<()>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    reader.map(|mut reader| {
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buffer
                        .lock()
                        .expect("capture buffer lock")
                        .extend_from_slice(&chunk[..n]),
                }
            }
        })
    })
}

/// Wait for a capture task to hit EOF, bounded by the grace period.
async fn settle_capture(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        let abort = task.abort_handle();
        if tokio::time::timeout(CAPTURE_GRACE, task).await.is_err() {
            abort.abort();
        }
    }
}

fn combined_output(stdout: &Mutex<Vec<u8>>, stderr: &Mutex<Vec<u8>>) -> String {
    let mut output =
        String::from_utf8_lossy(&stdout.lock().expect("capture buffer lock")).into_owned();
    output.push_str(&String::from_utf8_lossy(
        &stderr.lock().expect("capture buffer lock"),
    ));
    output
}
