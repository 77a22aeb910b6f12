//! Handle to a supervised external process

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::debug;

/// Cloneable handle to a long-running external process.
///
/// The process itself is owned by its monitor task; the handle only observes
/// liveness and readiness and can request termination.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    /// Cleared by the monitor task once the process has exited
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    /// Wakes the monitor task, which kills the child
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ProcessHandle {
    pub(crate) fn new(name: impl Into<String>, pid: Option<u32>) -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Self {
            name: name.into(),
            pid,
            alive: Arc::new(AtomicBool::new(true)),
            ready: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(shutdown_tx),
        };
        (handle, shutdown_rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_exited(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Request termination without waiting for the process to exit.
    ///
    /// Returns `false` if the process already exited or termination was
    /// already requested.
    pub fn terminate(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!("Terminating {} (pid {:?})", self.name, self.pid);
        // A closed channel means the monitor already finished
        let _ = self.shutdown_tx.send(true);
        true
    }
}
