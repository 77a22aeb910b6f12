//! Target Compiler Supervisor
//!
//! Drives one target through its passes: a single pass in production, or
//! an initial pass followed by one pass per change batch in watch mode.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::compiler::{CompileJob, Compiler};
use crate::config::{Target, TargetName};
use crate::error::BuildError;
use crate::watch::ChangeBatch;

/// Whether a pass was the target's first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Built,
    Rebuilt,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Built => write!(f, "built"),
            BuildStatus::Rebuilt => write!(f, "rebuilt"),
        }
    }
}

/// Completion notification for one target's pass
#[derive(Debug, Clone)]
pub struct PassComplete {
    pub target: TargetName,
    /// Pass number shared by all targets (0 = initial build)
    pub pass: u64,
    /// How many passes this target has finished, this one included
    pub cycle: u64,
    pub status: BuildStatus,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl PassComplete {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn a failed pass into a fatal build error
    pub fn into_result(self) -> Result<Self, BuildError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BuildError::Compile {
                target: self.target,
                errors: self.errors,
            })
        }
    }
}

/// Pass results flowing from watch tasks to the orchestrator
pub type PassSender = mpsc::Sender<Result<PassComplete, BuildError>>;

/// Supervisor for a single compilation target
pub struct TargetSupervisor {
    target: Target,
    job: CompileJob,
    compiler: Arc<dyn Compiler>,
    cycle: u64,
}

impl TargetSupervisor {
    pub fn new(
        target: Target,
        working_dir: &Path,
        production: bool,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        let job = CompileJob::for_target(&target, working_dir, production);
        Self {
            target,
            job,
            compiler,
            cycle: 0,
        }
    }

    pub fn name(&self) -> TargetName {
        self.target.name
    }

    /// Number of passes completed so far
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Compile once and report the outcome.
    ///
    /// Compile errors are reported inside the `PassComplete`; only a compiler
    /// that cannot run at all yields `Err`.
    pub async fn run_pass(&mut self, pass: u64) -> Result<PassComplete, BuildError> {
        let report = self.compiler.compile(&self.job).await?;

        self.cycle += 1;
        let status = if self.cycle == 1 {
            BuildStatus::Built
        } else {
            BuildStatus::Rebuilt
        };

        let name = self.target.name;
        if report.is_success() {
            info!(pass, "{} {} in {:?}", name, status, report.duration);
        } else {
            error!(pass, "{} failed with {} error(s)", name, report.errors.len());
            for message in &report.errors {
                error!("  [{}] {}", name, message);
            }
        }

        Ok(PassComplete {
            target: name,
            pass,
            cycle: self.cycle,
            status,
            errors: report.errors,
            duration: report.duration,
        })
    }

    /// Rebuild once per change batch until the feed closes or the
    /// orchestrator stops listening
    pub async fn watch(mut self, mut changes: broadcast::Receiver<ChangeBatch>, events: PassSender) {
        let name = self.target.name;
        debug!("{} supervisor watching for changes", name);

        loop {
            let batch = match changes.recv().await {
                Ok(batch) => batch,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // The next batch still covers the latest sources
                    warn!("{} skipped {} change batch(es)", name, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let result = self.run_pass(batch.pass).await;
            let fatal = result.is_err();
            if events.send(result).await.is_err() || fatal {
                break;
            }
        }

        debug!("{} supervisor stopped", name);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::compiler::{CompilerError, PassReport};
    use crate::watch::change_feed;

    /// Compiler double: succeeds unless a failure was scripted for a target
    #[derive(Default)]
    pub(crate) struct ScriptedCompiler {
        scripted: Mutex<HashMap<TargetName, VecDeque<Vec<String>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedCompiler {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Queue the error list returned by the next pass of `target`
        pub(crate) fn script(&self, target: TargetName, errors: Vec<&str>) {
            self.scripted
                .lock()
                .entry(target)
                .or_default()
                .push_back(errors.into_iter().map(String::from).collect());
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Compiler for ScriptedCompiler {
        async fn compile(&self, job: &CompileJob) -> Result<PassReport, CompilerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let errors = self
                .scripted
                .lock()
                .get_mut(&job.target)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_default();
            Ok(PassReport {
                errors,
                duration: Duration::from_millis(1),
            })
        }
    }

    fn supervisor(name: TargetName, compiler: Arc<ScriptedCompiler>) -> TargetSupervisor {
        let target = Target::default_for(name, Path::new("src"), Path::new("dist"));
        TargetSupervisor::new(target, Path::new("/plugin"), false, compiler)
    }

    #[tokio::test]
    async fn test_first_pass_built_then_rebuilt() {
        let compiler = ScriptedCompiler::new();
        let mut server = supervisor(TargetName::Server, compiler.clone());

        let first = server.run_pass(0).await.unwrap();
        assert_eq!(first.status, BuildStatus::Built);
        assert_eq!(first.cycle, 1);

        let second = server.run_pass(1).await.unwrap();
        assert_eq!(second.status, BuildStatus::Rebuilt);
        assert_eq!(second.cycle, 2);
        assert_eq!(server.cycle(), 2);
    }

    #[tokio::test]
    async fn test_errors_become_fatal_result() {
        let compiler = ScriptedCompiler::new();
        compiler.script(TargetName::Client, vec!["src/client/index.ts:1:1: boom"]);
        let mut client = supervisor(TargetName::Client, compiler);

        let pass = client.run_pass(0).await.unwrap();
        assert!(!pass.is_success());

        match pass.into_result() {
            Err(BuildError::Compile { target, errors }) => {
                assert_eq!(target, TargetName::Client);
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_watch_runs_one_pass_per_batch() {
        let compiler = ScriptedCompiler::new();
        let server = supervisor(TargetName::Server, compiler.clone());
        let feed = change_feed();
        let (tx, mut rx) = mpsc::channel(8);

        let task = tokio::spawn(server.watch(feed.subscribe(), tx));

        let expected = [(1, BuildStatus::Built), (2, BuildStatus::Rebuilt)];
        for (pass, status) in expected {
            feed.send(ChangeBatch {
                pass,
                paths: vec![],
            })
            .unwrap();
            let event = rx.recv().await.unwrap().unwrap();
            assert_eq!(event.pass, pass);
            assert_eq!(event.status, status);
        }

        drop(feed);
        task.await.unwrap();
        assert_eq!(compiler.calls(), 2);
    }
}
