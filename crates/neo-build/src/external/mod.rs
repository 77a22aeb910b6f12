//! External Process Supervisor
//!
//! Runs the web sub-project's processes. In production a single build
//! command must exit cleanly; in development a dev server (and optionally a
//! watch builder) is started and awaited until it reports readiness.

mod process;
mod readiness;

pub use process::ProcessHandle;
pub use readiness::{
    DEFAULT_GRACE_PERIOD, DevServerReadiness, ReadinessDetector, WatchBuildReadiness, strip_ansi,
};

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::{CommandSpec, WebOptions};

/// How long to keep reading stdout after the process exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a terminated process gets to exit before it is killed
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from external processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} failed ({status})")]
    Exited { name: String, status: ExitStatus },

    #[error("{name} exited before becoming ready ({status})")]
    ExitedBeforeReady { name: String, status: ExitStatus },

    #[error("Failed to wait for {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of {name}")]
    Lost { name: String },
}

/// A process to launch
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Name used in logs and errors
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Readiness fallback when no marker line appears
    pub grace_period: Duration,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: &CommandSpec, cwd: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: command.program.clone(),
            args: command.args.clone(),
            cwd: cwd.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            name: self.name.clone(),
            source,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Production: run to completion
// ─────────────────────────────────────────────────────────────────────────────

/// Run a one-shot process; succeeds only on exit status 0.
///
/// stdout is discarded and stderr lines are relayed as errors.
pub async fn run_to_completion(spec: &ProcessSpec) -> Result<(), ProcessError> {
    info!("Running {} in {}", spec.name, spec.cwd.display());

    let mut child = spec
        .command()
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let relay = child.stderr.take().map(|stderr| {
        let name = spec.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = strip_ansi(&line);
                if !line.trim().is_empty() {
                    error!("[{}] {}", name, line.trim_end());
                }
            }
        })
    });

    let status = child.wait().await.map_err(|source| ProcessError::Wait {
        name: spec.name.clone(),
        source,
    })?;

    if let Some(relay) = relay {
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, relay).await;
    }

    if status.success() {
        info!("{} finished", spec.name);
        Ok(())
    } else {
        Err(ProcessError::Exited {
            name: spec.name.clone(),
            status,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Development: spawn and wait for readiness
// ─────────────────────────────────────────────────────────────────────────────

/// Start a long-running process and return once it is ready.
///
/// Ready means the detector matched a stdout line, or the grace period
/// elapsed while the process was still running. Exiting first is an error.
pub async fn spawn_until_ready(
    spec: &ProcessSpec,
    detector: Arc<dyn ReadinessDetector>,
) -> Result<ProcessHandle, ProcessError> {
    info!("Starting {}", spec.name);

    let mut child = spec
        .command()
        .env("FORCE_COLOR", "0")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let lost = || ProcessError::Lost {
        name: spec.name.clone(),
    };
    let stdout = child.stdout.take().ok_or_else(lost)?;
    let stderr = child.stderr.take().ok_or_else(lost)?;

    let (handle, shutdown_rx) = ProcessHandle::new(&spec.name, child.id());
    let (ready_tx, mut ready_rx) = oneshot::channel();

    let relay = LineRelay {
        handle: handle.clone(),
        detector,
        ready_tx: Some(ready_tx),
    };
    let stdout = BufReader::new(stdout).lines();
    let stderr = BufReader::new(stderr).lines();
    tokio::spawn(monitor(child, stdout, stderr, relay, shutdown_rx));

    let outcome = tokio::select! {
        outcome = &mut ready_rx => Some(outcome),
        _ = tokio::time::sleep(spec.grace_period) => None,
    };

    let outcome = match outcome {
        Some(outcome) => outcome,
        None if handle.is_alive() => {
            debug!("{} printed no readiness marker, assuming ready after {:?}", spec.name, spec.grace_period);
            handle.mark_ready();
            return Ok(handle);
        }
        // Exited before the deadline; the monitor reports how once stdout is drained
        None => ready_rx.await,
    };

    match outcome {
        Ok(Ok(())) => {
            info!("{} ready", spec.name);
            Ok(handle)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(lost()),
    }
}

/// Per-process stdout handling: readiness first, then notice relay
struct LineRelay {
    handle: ProcessHandle,
    detector: Arc<dyn ReadinessDetector>,
    ready_tx: Option<oneshot::Sender<Result<(), ProcessError>>>,
}

impl LineRelay {
    fn stdout_line(&mut self, raw: &str) {
        let line = strip_ansi(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let name = self.handle.name();
        if self.handle.is_ready() {
            if self.detector.is_notice(line) {
                info!("[{}] {}", name, line);
            } else {
                debug!("[{}] {}", name, line);
            }
        } else if self.detector.is_ready(line) {
            self.handle.mark_ready();
            if let Some(tx) = self.ready_tx.take() {
                let _ = tx.send(Ok(()));
            }
        } else {
            trace!("[{}] {}", name, line);
        }
    }

    /// Report a failure to a caller still waiting for readiness
    fn fail(&mut self, error: ProcessError) -> Option<ProcessError> {
        if self.handle.is_ready() {
            return Some(error);
        }
        match self.ready_tx.take() {
            Some(tx) => tx.send(Err(error)).err().and_then(Result::err),
            None => Some(error),
        }
    }
}

async fn monitor(
    mut child: Child,
    mut stdout: Lines<BufReader<ChildStdout>>,
    mut stderr: Lines<BufReader<ChildStderr>>,
    mut relay: LineRelay,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let name = relay.handle.name().to_string();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut stop_requested = false;
    let mut kill_at: Option<Instant> = None;

    let waited = loop {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => relay.stdout_line(&line),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    let line = strip_ansi(&line);
                    if !line.trim().is_empty() {
                        warn!("[{}] {}", name, line.trim_end());
                    }
                }
                _ => stderr_open = false,
            },
            status = child.wait() => break status,
            changed = shutdown_rx.changed(), if !stop_requested => {
                stop_requested = true;
                if changed.is_ok() && *shutdown_rx.borrow() {
                    request_stop(&mut child, &name);
                    kill_at = Some(Instant::now() + STOP_TIMEOUT);
                }
            }
            _ = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                kill_at = None;
                warn!("{} did not exit in time, killing", name);
                if let Err(e) = child.start_kill() {
                    debug!("Failed to kill {}: {}", name, e);
                }
            }
        }
    };

    relay.handle.mark_exited();

    if stdout_open {
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Ok(Some(line)) = stdout.next_line().await {
                relay.stdout_line(&line);
            }
        })
        .await;
    }

    let error = match waited {
        Ok(status) if relay.handle.is_terminated() => {
            debug!("{} stopped ({})", name, status);
            return;
        }
        Ok(status) => ProcessError::ExitedBeforeReady {
            name: name.clone(),
            status,
        },
        Err(source) => ProcessError::Wait {
            name: name.clone(),
            source,
        },
    };

    // Only unreported failures are logged here; the rest reach the caller
    if let Some(error) = relay.fail(error) {
        match error {
            ProcessError::ExitedBeforeReady { status, .. } => {
                warn!("{} exited unexpectedly ({})", name, status)
            }
            other => error!("{}", other),
        }
    }
}

/// Ask the child to exit: SIGTERM on unix so wrappers like `npx` can stop
/// their own children; the monitor kills it after `STOP_TIMEOUT`
#[cfg(unix)]
fn request_stop(child: &mut Child, name: &str) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    // Already reaped
    let Some(pid) = child.id() else {
        return;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("Failed to send SIGTERM to {}: {}", name, e);
        if let Err(e) = child.start_kill() {
            debug!("Failed to kill {}: {}", name, e);
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child, name: &str) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill {}: {}", name, e);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Web sub-project supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Supervisor for the web sub-project's processes
#[derive(Debug, Clone)]
pub struct ExternalProcessSupervisor {
    options: WebOptions,
}

impl ExternalProcessSupervisor {
    pub fn new(options: WebOptions) -> Self {
        Self { options }
    }

    fn spec(&self, name: &str, command: &CommandSpec) -> ProcessSpec {
        ProcessSpec::new(name, command, &self.options.dir).with_grace_period(self.options.grace_period)
    }

    /// Production: run the web build to completion
    pub async fn build(&self) -> Result<(), ProcessError> {
        run_to_completion(&self.spec("web build", &self.options.build)).await
    }

    /// Development: start the dev server, then the watch builder if any.
    ///
    /// If a later process fails to start, the earlier ones are terminated.
    pub async fn start(&self) -> Result<Vec<ProcessHandle>, ProcessError> {
        let mut handles = Vec::new();

        let dev_server = self.spec("web dev server", &self.options.dev_server);
        handles.push(spawn_until_ready(&dev_server, Arc::new(DevServerReadiness)).await?);

        if let Some(command) = &self.options.watch_build {
            let watch_build = self.spec("web watch build", command);
            match spawn_until_ready(&watch_build, Arc::new(WatchBuildReadiness)).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        handle.terminate();
                    }
                    return Err(e);
                }
            }
        }

        Ok(handles)
    }
}
