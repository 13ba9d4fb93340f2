//! Tool-server process spawner and termination guard.
//!
//! Spawns one tool-server process per session with:
//! - `env_clear()` plus a safe variable allowlist, so gateway secrets other
//!   than the configured credential never reach the child.
//! - piped stdin/stdout/stderr and `kill_on_drop(true)`.
//! - on Unix, its own process group, so wrappers such as `sh -c`, `npx` or
//!   `uvx` are torn down together with everything they started.
//! - a [`ProcessGuard`] that terminates the child exactly once, either through
//!   [`ProcessGuard::terminate`] or from `Drop` when a session is abandoned.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Environment variables inherited by every tool-server process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TMPDIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Upper bound on captured stderr; older bytes are dropped first.
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// How long a failed session waits for the stderr pipe to drain.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ── Configuration ────────────────────────────────────────────────────────────

/// Everything needed to launch a tool-server process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Binary to execute.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Extra variable names inherited from the gateway environment.
    pub env_passthrough: Vec<String>,
    /// `(name, value)` of the credential injected into the child.
    pub credential: Option<(String, String)>,
    /// Grace period between `SIGTERM` and a hard kill.
    pub kill_grace: Duration,
}

impl SpawnConfig {
    /// Derive spawn settings from the loaded configuration.
    ///
    /// The credential is only forwarded when it has been loaded.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        let credential = (!config.credential.value.is_empty()).then(|| {
            (
                config.credential.child_env_name().to_owned(),
                config.credential.value.clone(),
            )
        });

        Self {
            command: config.process.command.clone(),
            args: config.process.args.clone(),
            working_dir: config.process.working_dir.clone(),
            env_passthrough: config.process.env_passthrough.clone(),
            credential,
            kill_grace: config.kill_grace(),
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// Running totals of spawned and terminated tool-server processes.
#[derive(Debug, Default)]
pub struct SessionLedger {
    spawned: AtomicU64,
    terminated: AtomicU64,
}

impl SessionLedger {
    /// Processes successfully spawned so far.
    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Processes terminated so far.
    #[must_use]
    pub fn terminated(&self) -> u64 {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Processes spawned but not yet terminated.
    #[must_use]
    pub fn live(&self) -> u64 {
        self.spawned().saturating_sub(self.terminated())
    }

    fn record_spawned(&self) {
        self.spawned.fetch_add(1, Ordering::SeqCst);
    }

    fn record_terminated(&self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Owns a tool-server child and guarantees it is terminated exactly once.
#[derive(Debug)]
pub struct ProcessGuard {
    session_id: String,
    child: Option<Child>,
    /// Process group led by the child; equal to its pid on Unix.
    pgid: Option<i32>,
    grace: Duration,
    ledger: Arc<SessionLedger>,
}

impl ProcessGuard {
    /// OS process id, while the child is still owned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Wait for the child to exit on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if waiting fails or the child was already
    /// terminated.
    pub async fn wait_exit(&mut self) -> Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| AppError::Io("tool server already terminated".into()))?;
        child
            .wait()
            .await
            .map_err(|err| AppError::Io(format!("failed to wait for tool server: {err}")))
    }

    /// Stop the child and its process group: `SIGTERM`, then a hard kill once
    /// the grace period lapses.
    ///
    /// Consumes the guard so a session cannot terminate its process twice.
    pub async fn terminate(mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        terminate_child(&self.session_id, child, self.pgid, self.grace).await;
        self.ledger.record_terminated();
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(
                session_id = %self.session_id,
                "session abandoned before termination; killing tool server"
            );
            if let Err(err) = child.start_kill() {
                debug!(session_id = %self.session_id, %err, "start_kill failed");
            }
            #[cfg(unix)]
            {
                signal_group(&self.session_id, self.pgid, nix::sys::signal::Signal::SIGKILL);
            }
            self.ledger.record_terminated();
        }
    }
}

async fn terminate_child(session_id: &str, mut child: Child, pgid: Option<i32>, grace: Duration) {
    let mut exited = match child.try_wait() {
        Ok(Some(status)) => {
            debug!(session_id, %status, "tool server already exited");
            true
        }
        Ok(None) => false,
        Err(err) => {
            warn!(session_id, %err, "failed to poll tool server status");
            false
        }
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        if !exited
            && !grace.is_zero()
            && signal_group(session_id, pgid, Signal::SIGTERM)
        {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                debug!(session_id, %status, "tool server exited after SIGTERM");
                exited = true;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (pgid, grace);

    if !exited {
        match child.kill().await {
            Ok(()) => debug!(session_id, "tool server killed"),
            Err(err) => warn!(session_id, %err, "failed to kill tool server"),
        }
    }

    // Descendants can outlive the leader and keep its pipes open.
    #[cfg(unix)]
    {
        signal_group(session_id, pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

/// Signal every process in the child's group. Returns whether delivery succeeded.
#[cfg(unix)]
fn signal_group(session_id: &str, pgid: Option<i32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(raw) = pgid else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            debug!(session_id, %err, ?signal, "process group signal failed");
            false
        }
    }
}

/// Background task accumulating the tail of a child's stderr.
///
/// The tail is shared with the task, so whatever arrived is available even
/// while a surviving descendant keeps the pipe open.
#[derive(Debug)]
pub struct StderrCapture {
    tail: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl StderrCapture {
    fn start(mut stderr: ChildStderr) -> Self {
        let tail = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tail);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
                        captured.extend_from_slice(&chunk[..n]);
                        if captured.len() > MAX_STDERR_BYTES {
                            let excess = captured.len() - MAX_STDERR_BYTES;
                            captured.drain(..excess);
                        }
                    }
                }
            }
        });
        Self { tail, handle }
    }

    /// Collect what the child wrote, waiting briefly for the pipe to close.
    pub async fn collect(&mut self) -> String {
        // A timeout only means the pipe is still held open elsewhere.
        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut self.handle).await;
        let captured = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&captured).trim().to_owned()
    }

    /// Stop capturing; used once the session no longer needs diagnostics.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// A spawned tool server with its stdio split out.
#[derive(Debug)]
pub struct ToolProcess {
    /// Termination guard owning the child.
    pub guard: ProcessGuard,
    /// Child stdin for JSON-RPC requests.
    pub stdin: ChildStdin,
    /// Child stdout carrying JSON-RPC responses and noise.
    pub stdout: ChildStdout,
    /// Captured stderr diagnostics.
    pub stderr: StderrCapture,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn a tool-server process for one session.
///
/// # Errors
///
/// Returns `AppError::Spawn` when the OS refuses to start the process or a
/// stdio pipe could not be captured.
pub fn spawn_tool_server(
    config: &SpawnConfig,
    session_id: &str,
    ledger: &Arc<SessionLedger>,
) -> Result<ToolProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for key in ALLOWED_ENV_VARS
        .iter()
        .copied()
        .chain(config.env_passthrough.iter().map(String::as_str))
    {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    if let Some((name, value)) = &config.credential {
        cmd.env(name, value);
    }

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn {}: {err}", config.command))
    })?;
    ledger.record_spawned();

    info!(session_id, pid = child.id(), command = %config.command, "tool server spawned");

    // From here on the guard owns the child, so early returns still terminate it.
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pgid = child.id().and_then(|id| i32::try_from(id).ok());
    let guard = ProcessGuard {
        session_id: session_id.to_owned(),
        child: Some(child),
        pgid,
        grace: config.kill_grace,
        ledger: Arc::clone(ledger),
    };

    let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
        return Err(AppError::Spawn("failed to capture tool server stdio".into()));
    };

    Ok(ToolProcess {
        guard,
        stdin,
        stdout,
        stderr: StderrCapture::start(stderr),
    })
}
