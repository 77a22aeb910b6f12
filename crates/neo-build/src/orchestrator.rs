//! Orchestrator
//!
//! Wires one build run together: clear the output, bring up the web
//! sub-project, run the initial pass of every target, then (in watch mode)
//! feed rebuild completions through the aggregator until shutdown.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use neo_build_tasks::{ManifestGenerator, ManifestTask, TypesGenerator, TypesTask, clear};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::aggregator::{CompletionAggregator, SettledPass};
use crate::compiler::{Compiler, EsbuildCompiler};
use crate::config::BuildOptions;
use crate::downstream::DownstreamActions;
use crate::error::{BuildError, BuildResult};
use crate::events::BuildEvent;
use crate::external::{ExternalProcessSupervisor, ProcessHandle};
use crate::shutdown::{ShutdownCoordinator, shutdown_signal};
use crate::target::{PassComplete, TargetSupervisor};
use crate::watch::{ChangeBatch, ChangeFeed, INITIAL_PASS, SourceWatcher, change_feed};

const EVENT_CAPACITY: usize = 64;
const PASS_CHANNEL_CAPACITY: usize = 32;

/// Top-level driver for one build invocation
pub struct Orchestrator {
    options: BuildOptions,
    compiler: Arc<dyn Compiler>,
    manifest: Arc<dyn ManifestTask>,
    types: Arc<dyn TypesTask>,
    events: broadcast::Sender<BuildEvent>,
    shutdown: Arc<ShutdownCoordinator>,
    /// Externally driven change feed; replaces the file watcher when set
    change_feed: Option<ChangeFeed>,
}

impl Orchestrator {
    pub fn new(options: BuildOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = Arc::new(ShutdownCoordinator::new().with_events(events.clone()));
        Self {
            compiler: Arc::new(EsbuildCompiler::new()),
            manifest: Arc::new(ManifestGenerator::new(&options.out_dir)),
            types: Arc::new(TypesGenerator::new(&options.out_dir)),
            options,
            events,
            shutdown,
            change_feed: None,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_manifest_task(mut self, manifest: Arc<dyn ManifestTask>) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_types_task(mut self, types: Arc<dyn TypesTask>) -> Self {
        self.types = types;
        self
    }

    /// Drive rebuilds from `feed` instead of watching the source directory
    pub fn with_change_feed(mut self, feed: ChangeFeed) -> Self {
        self.change_feed = Some(feed);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Subscribe to build events
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    /// Run until the build finishes (production) or Ctrl+C / SIGTERM (watch)
    pub async fn run(self) -> BuildResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until the build finishes (production) or `shutdown` resolves (watch)
    pub async fn run_until<F>(self, shutdown: F) -> BuildResult<()>
    where
        F: Future<Output = ()>,
    {
        let options = &self.options;
        let mode = if options.production { "production" } else { "development" };
        info!("Building {} target(s) in {} mode", options.targets.len(), mode);

        clear(&options.working_dir, &[&options.out_dir]).await?;

        let mut external = Vec::new();
        if let Some(web) = &options.web {
            let supervisor = ExternalProcessSupervisor::new(web.clone());
            if options.production {
                supervisor.build().await?;
            } else {
                external = supervisor.start().await?;
            }
        }

        // Subscribe before the first pass so no change batch is missed
        let feed = if options.production {
            None
        } else {
            Some(self.change_feed.clone().unwrap_or_else(change_feed))
        };
        let mut supervisors: Vec<(TargetSupervisor, Option<broadcast::Receiver<ChangeBatch>>)> = options
            .targets
            .iter()
            .map(|target| {
                let supervisor = TargetSupervisor::new(
                    target.clone(),
                    &options.working_dir,
                    options.production,
                    self.compiler.clone(),
                );
                (supervisor, feed.as_ref().map(|f| f.subscribe()))
            })
            .collect();

        let mut aggregator = CompletionAggregator::new(options.target_names());
        let downstream = DownstreamActions::new(options, self.manifest.clone(), self.types.clone());

        let mut settled = None;
        for (supervisor, _) in &mut supervisors {
            let complete = match supervisor.run_pass(INITIAL_PASS).await.and_then(PassComplete::into_result) {
                Ok(complete) => complete,
                Err(e) => {
                    stop_all(&external);
                    return Err(e);
                }
            };
            settled = settled.or(self.record(&mut aggregator, complete));
        }

        let background = match settled {
            Some(settled) => self.settle(&downstream, settled),
            None => Vec::new(),
        };

        let Some(feed) = feed else {
            join_all(background).await;
            info!("Build complete");
            return Ok(());
        };

        let watcher = if self.change_feed.is_some() {
            None
        } else {
            match SourceWatcher::new(options.source_root(), &options.watch, feed.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    stop_all(&external);
                    return Err(e.into());
                }
            }
        };

        let (tx, mut rx) = mpsc::channel(PASS_CHANNEL_CAPACITY);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for (supervisor, changes) in supervisors {
            if let Some(changes) = changes {
                tasks.push(tokio::spawn(supervisor.watch(changes, tx.clone())));
            }
        }
        drop(tx);
        if let Some(watcher) = watcher {
            tasks.push(tokio::spawn(watcher.run()));
        }

        self.shutdown.register_all(external);

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.shutdown.request_shutdown();
                    break Ok(());
                }
                event = rx.recv() => match event {
                    Some(Ok(complete)) => {
                        if let Some(settled) = self.record(&mut aggregator, complete) {
                            // Actions run detached; the next pass does not wait for them
                            self.settle(&downstream, settled);
                        }
                    }
                    Some(Err(e)) => {
                        self.shutdown.request_shutdown();
                        break Err(e);
                    }
                    None => {
                        self.shutdown.request_shutdown();
                        break Err(BuildError::ChannelClosed);
                    }
                }
            }
        };

        for task in tasks {
            task.abort();
        }
        result
    }

    fn record(&self, aggregator: &mut CompletionAggregator, complete: PassComplete) -> Option<SettledPass> {
        let settled = aggregator.record(&complete);
        self.publish(BuildEvent::PassComplete(complete));
        settled
    }

    fn settle(&self, downstream: &DownstreamActions, settled: SettledPass) -> Vec<JoinHandle<()>> {
        let tasks = downstream.dispatch(&settled);
        self.publish(BuildEvent::PassSettled(settled));
        tasks
    }

    fn publish(&self, event: BuildEvent) {
        debug!("Publishing {}", event.event_type());
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn stop_all(handles: &[ProcessHandle]) {
    for handle in handles {
        handle.terminate();
    }
}
