//! Source Watcher
//!
//! Watches the plugin source directory and publishes debounced change
//! batches. Every batch is one pass: each target supervisor rebuilds once
//! per batch it receives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};
use wildmatch::WildMatch;

use crate::config::WatchOptions;

/// Pass number used for the initial build
pub const INITIAL_PASS: u64 = 0;

/// A debounced set of source changes, numbered by pass
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub pass: u64,
    pub paths: Vec<PathBuf>,
}

/// Fan-out channel every target supervisor subscribes to
pub type ChangeFeed = broadcast::Sender<ChangeBatch>;

/// Create a change feed with room for a few queued batches
pub fn change_feed() -> ChangeFeed {
    broadcast::channel(16).0
}

/// File-name filter for paths that never trigger a rebuild
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<WildMatch>,
}

impl IgnoreList {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| WildMatch::new(p)).collect(),
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Source directory watcher
pub struct SourceWatcher {
    /// Watched directory
    root: PathBuf,
    /// Raw changed paths from the notify callback
    rx: mpsc::Receiver<PathBuf>,
    feed: ChangeFeed,
    debounce: Duration,
    next_pass: u64,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    /// Start watching `root`; batches are numbered from `INITIAL_PASS + 1`
    pub fn new(
        root: impl AsRef<Path>,
        options: &WatchOptions,
        feed: ChangeFeed,
    ) -> Result<Self, notify::Error> {
        let root = root
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| root.as_ref().to_path_buf());
        let (tx, rx) = mpsc::channel(256);
        let ignore = IgnoreList::new(&options.ignore);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    for path in Self::relevant_paths(&event, &ignore) {
                        let _ = tx.blocking_send(path);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("Watching {} for changes", root.display());

        Ok(Self {
            root,
            rx,
            feed,
            debounce: options.debounce,
            next_pass: INITIAL_PASS + 1,
            _watcher: watcher,
        })
    }

    /// Paths of a notify event worth rebuilding for
    fn relevant_paths(event: &Event, ignore: &IgnoreList) -> Vec<PathBuf> {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {}
            _ => return Vec::new(),
        }

        event
            .paths
            .iter()
            .filter(|p| !ignore.is_ignored(p))
            .cloned()
            .collect()
    }

    /// Run the debounce loop until the watcher is dropped
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let mut paths = vec![first];

            // Editors often write a file several times in a row
            tokio::time::sleep(self.debounce).await;
            while let Ok(path) = self.rx.try_recv() {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }

            let batch = ChangeBatch {
                pass: self.next_pass,
                paths,
            };
            self.next_pass += 1;

            debug!(
                pass = batch.pass,
                "{} file(s) changed under {}",
                batch.paths.len(),
                self.root.display()
            );

            if self.feed.send(batch).is_err() {
                debug!("No target supervisors listening, stopping watcher");
                break;
            }
        }
    }
}
