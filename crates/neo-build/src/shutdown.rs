//! Shutdown Coordinator
//!
//! Owns the external process handles of a watch-mode run. A signal shim
//! (`shutdown_signal`) or any caller invokes `request_shutdown`, which asks
//! every live process to terminate without waiting for it to exit.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::events::BuildEvent;
use crate::external::ProcessHandle;

/// Terminates tracked external processes exactly once
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    handles: Mutex<Vec<ProcessHandle>>,
    requested: AtomicBool,
    events: Option<broadcast::Sender<BuildEvent>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `ShutdownRequested` on this channel when shutdown starts
    pub fn with_events(mut self, events: broadcast::Sender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Track a handle; if shutdown already happened it is terminated at once
    pub fn register(&self, handle: ProcessHandle) {
        let mut handles = self.handles.lock();
        if self.is_requested() {
            handle.terminate();
        }
        handles.push(handle);
    }

    pub fn register_all(&self, handles: impl IntoIterator<Item = ProcessHandle>) {
        for handle in handles {
            self.register(handle);
        }
    }

    /// Number of tracked handles still running
    pub fn live_count(&self) -> usize {
        self.handles.lock().iter().filter(|h| h.is_alive()).count()
    }

    /// Terminate every live tracked process.
    ///
    /// Returns `false` when shutdown was already requested.
    pub fn request_shutdown(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("Shutting down...");
        if let Some(events) = &self.events {
            let _ = events.send(BuildEvent::ShutdownRequested);
        }

        let handles = self.handles.lock();
        for handle in handles.iter() {
            if handle.terminate() {
                match handle.pid() {
                    Some(pid) => info!("Stopping {} (pid {})", handle.name(), pid),
                    None => info!("Stopping {}", handle.name()),
                }
            }
        }
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed, that signal is never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
