use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};

use lmr_domain::error::{Error, Result};

use crate::output::OutputBuffer;

/// How long `stop()` waits for a graceful exit before force-killing.
pub const GRACEFUL_STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Everything needed to spawn a backend child: executable, args, extra
/// environment variables, and working directory.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub exe: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

/// Per-handle lifecycle state. `Running -> Stopped` directly when the child
/// exits on its own; any terminal state is sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Receives each line of the child's combined stdout/stderr as it arrives.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// A sink that discards everything, for backends that do not need durable
/// log capture beyond the in-memory [`OutputBuffer`].
pub struct NullSink;
impl LogSink for NullSink {
    fn write_line(&self, _line: &str) {}
}

/// A live (or recently live) child process under supervision.
pub struct ProcessHandle {
    pid: u32,
    state: Arc<RwLock<ProcessState>>,
    output: Arc<RwLock<OutputBuffer>>,
    kill_tx: mpsc::Sender<()>,
    stopped: Arc<Notify>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.read()
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.state(), ProcessState::Stopped)
    }

    pub fn recent_output(&self, lines: usize) -> String {
        self.output.read().tail(lines)
    }

    /// Ordered shutdown: signal the root (and, via its own process group,
    /// its descendants), wait up to [`GRACEFUL_STOP_TIMEOUT`], then
    /// force-kill whatever is still alive. Idempotent; safe to call on an
    /// already-stopped handle.
    pub async fn stop(&self) {
        if matches!(self.state(), ProcessState::Stopped) {
            return;
        }
        *self.state.write() = ProcessState::Stopping;

        // Ask the monitor task to run the platform-specific terminate
        // sequence (graceful signal, bounded wait, force-kill).
        let _ = self.kill_tx.send(()).await;

        let _ = tokio::time::timeout(GRACEFUL_STOP_TIMEOUT + std::time::Duration::from_secs(1), async {
            while self.is_alive() {
                self.stopped.notified().await;
            }
        })
        .await;

        *self.state.write() = ProcessState::Stopped;
    }
}

/// `start(exe, args, env, working_dir, log_sink) -> handle`.
///
/// Spawns the child with stdout/stderr piped; a background task streams
/// both into `log_sink` (unbuffered, line by line) and into the handle's
/// in-memory [`OutputBuffer`]. On Unix the child is placed in its own
/// process group so `stop()` can terminate it and any descendants as a
/// unit without walking `/proc`.
///
/// Returns immediately; does not wait for readiness. Fails with
/// [`Error::SpawnFailed`] on immediate exec failure, and never leaks a
/// handle in that case.
pub fn start(spec: SpawnSpec, log_sink: Arc<dyn LogSink>) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.exe);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| {
        Error::SpawnFailed(format!("failed to spawn {}: {e}", spec.exe.display()))
    })?;

    let pid = child.id().ok_or_else(|| {
        Error::SpawnFailed(format!("{} exited immediately after spawn", spec.exe.display()))
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let state = Arc::new(RwLock::new(ProcessState::Starting));
    let output = Arc::new(RwLock::new(OutputBuffer::new(64 * 1024)));
    let stopped = Arc::new(Notify::new());
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

    *state.write() = ProcessState::Running;

    {
        let state = state.clone();
        let output = output.clone();
        let stopped = stopped.clone();

        tokio::spawn(async move {
            let out_output = output.clone();
            let out_sink = log_sink.clone();
            let stdout_task = tokio::spawn(async move {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        out_sink.write_line(&line);
                        let mut buf = out_output.write();
                        buf.push(&line);
                        buf.push("\n");
                    }
                }
            });

            let err_output = output.clone();
            let err_sink = log_sink.clone();
            let stderr_task = tokio::spawn(async move {
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        err_sink.write_line(&line);
                        let mut buf = err_output.write();
                        buf.push(&line);
                        buf.push("\n");
                    }
                }
            });

            tokio::select! {
                result = child.wait() => {
                    let _ = stdout_task.await;
                    let _ = stderr_task.await;
                    match result {
                        Ok(status) => tracing::debug!(pid, ?status, "backend process exited on its own"),
                        Err(e) => tracing::warn!(pid, error = %e, "error waiting on backend process"),
                    }
                    *state.write() = ProcessState::Stopped;
                    stopped.notify_waiters();
                }
                _ = kill_rx.recv() => {
                    terminate(&mut child, pid).await;
                    let _ = stdout_task.await;
                    let _ = stderr_task.await;
                    *state.write() = ProcessState::Stopped;
                    stopped.notify_waiters();
                }
            }
        });
    }

    Ok(ProcessHandle {
        pid,
        state,
        output,
        kill_tx,
        stopped,
    })
}

/// Graceful-then-forceful terminate sequence used by the monitor task.
async fn terminate(child: &mut tokio::process::Child, pid: u32) {
    graceful_signal(pid);

    let waited = tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await;
    if waited.is_err() {
        tracing::warn!(pid, "backend process did not exit within grace period, force-killing");
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

/// Send a graceful terminate signal to the child's whole process group on
/// Unix (covers descendants re-parented under it); on other platforms there
/// is no portable graceful signal, so this is a no-op and the force-kill in
/// [`terminate`] after the grace window does the work.
#[cfg(unix)]
fn graceful_signal(pid: u32) {
    // Negative pid addresses the process group created via `process_group(0)`.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn graceful_signal(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(exe: &str, args: &[&str]) -> SpawnSpec {
        SpawnSpec {
            exe: exe.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn start_runs_and_reports_alive_then_self_exits() {
        let handle = start(spec("sleep", &["0.2"]), Arc::new(NullSink)).unwrap();
        assert!(handle.is_alive());
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!handle.is_alive());
        assert_eq!(handle.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn stop_terminates_a_long_running_process() {
        let handle = start(spec("sleep", &["30"]), Arc::new(NullSink)).unwrap();
        assert!(handle.is_alive());
        handle.stop().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let handle = start(spec("sleep", &["30"]), Arc::new(NullSink)).unwrap();
        handle.stop().await;
        handle.stop().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn start_fails_for_nonexistent_executable() {
        let result = start(spec("/no/such/lemonade-backend-binary", &[]), Arc::new(NullSink));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn captures_stdout_into_output_buffer() {
        let handle = start(spec("echo", &["hello from backend"]), Arc::new(NullSink)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(handle.recent_output(10).contains("hello from backend"));
    }
}
