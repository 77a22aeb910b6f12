//! Downstream actions run once per settled pass

use std::path::PathBuf;
use std::sync::Arc;

use neo_build_tasks::{ManifestTask, TypesTask};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::SettledPass;
use crate::config::BuildOptions;

/// Manifest and declaration generation, triggered after all targets settle
pub struct DownstreamActions {
    working_dir: PathBuf,
    production: bool,
    manifest_enabled: bool,
    types_enabled: bool,
    type_dirs: Vec<PathBuf>,
    manifest: Arc<dyn ManifestTask>,
    types: Arc<dyn TypesTask>,
}

impl DownstreamActions {
    pub fn new(
        options: &BuildOptions,
        manifest: Arc<dyn ManifestTask>,
        types: Arc<dyn TypesTask>,
    ) -> Self {
        Self {
            working_dir: options.working_dir.clone(),
            production: options.production,
            manifest_enabled: options.manifest,
            types_enabled: options.types,
            type_dirs: options.type_source_dirs(),
            manifest,
            types,
        }
    }

    /// Start the actions for a settled pass.
    ///
    /// Runs, in order: manifest generation, the watching notice (development
    /// only), declaration generation (production only). Generation runs in
    /// the background and failures are only logged; the returned handles
    /// let a one-shot build wait for them.
    pub fn dispatch(&self, settled: &SettledPass) -> Vec<JoinHandle<()>> {
        if settled.failed {
            warn!(pass = settled.pass, "Build failed, skipping manifest and types");
            return Vec::new();
        }

        let mut tasks = Vec::new();

        if self.manifest_enabled {
            let manifest = self.manifest.clone();
            let working_dir = self.working_dir.clone();
            let production = self.production;
            tasks.push(tokio::spawn(async move {
                match manifest.generate(&working_dir, production).await {
                    Ok(path) => info!("Manifest written to {}", path.display()),
                    Err(e) => error!("Manifest generation failed: {}", e),
                }
            }));
        }

        if !self.production {
            info!("Watching for changes...");
        }

        if self.production && self.types_enabled {
            let types = self.types.clone();
            let working_dir = self.working_dir.clone();
            let dirs = self.type_dirs.clone();
            tasks.push(tokio::spawn(async move {
                for outcome in types.generate(&working_dir, &dirs).await {
                    match outcome.result {
                        Ok(out) => info!("Types for {} written to {}", outcome.dir.display(), out.display()),
                        Err(e) => error!("Type generation for {} failed: {}", outcome.dir.display(), e),
                    }
                }
            }));
        }

        tasks
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use neo_build_tasks::{ManifestError, TypesOutcome};

    use super::*;
    use crate::config::{BuildConfig, Overrides};

    /// Manifest double counting its invocations
    #[derive(Default)]
    pub(crate) struct CountingManifest {
        pub(crate) calls: AtomicUsize,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl ManifestTask for CountingManifest {
        async fn generate(&self, working_dir: &Path, _production: bool) -> Result<PathBuf, ManifestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ManifestError::NotFound(working_dir.join("neo-plugin.json")));
            }
            Ok(working_dir.join("dist/neo-plugin.json"))
        }
    }

    /// Types double counting its invocations
    #[derive(Default)]
    pub(crate) struct CountingTypes {
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl TypesTask for CountingTypes {
        async fn generate(&self, working_dir: &Path, source_dirs: &[PathBuf]) -> Vec<TypesOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            source_dirs
                .iter()
                .map(|dir| TypesOutcome {
                    dir: dir.clone(),
                    result: Ok(working_dir.join("dist/types").join(dir)),
                })
                .collect()
        }
    }

    fn actions(
        production: bool,
        manifest: Arc<CountingManifest>,
        types: Arc<CountingTypes>,
    ) -> DownstreamActions {
        let overrides = Overrides {
            production,
            web: Some(false),
            ..Default::default()
        };
        let options = BuildOptions::resolve("/plugin", BuildConfig::default(), &overrides).unwrap();
        DownstreamActions::new(&options, manifest, types)
    }

    async fn run(actions: &DownstreamActions, settled: SettledPass) {
        for task in actions.dispatch(&settled) {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_development_runs_manifest_only() {
        let manifest = Arc::new(CountingManifest::default());
        let types = Arc::new(CountingTypes::default());
        let actions = actions(false, manifest.clone(), types.clone());

        run(&actions, SettledPass { pass: 0, failed: false }).await;

        assert_eq!(manifest.calls.load(Ordering::SeqCst), 1);
        assert_eq!(types.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_production_runs_manifest_and_types() {
        let manifest = Arc::new(CountingManifest::default());
        let types = Arc::new(CountingTypes::default());
        let actions = actions(true, manifest.clone(), types.clone());

        run(&actions, SettledPass { pass: 0, failed: false }).await;

        assert_eq!(manifest.calls.load(Ordering::SeqCst), 1);
        assert_eq!(types.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_runs_nothing() {
        let manifest = Arc::new(CountingManifest::default());
        let types = Arc::new(CountingTypes::default());
        let actions = actions(true, manifest.clone(), types.clone());

        assert!(actions.dispatch(&SettledPass { pass: 3, failed: true }).is_empty());
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manifest_failure_is_not_fatal() {
        let manifest = Arc::new(CountingManifest {
            fail: true,
            ..Default::default()
        });
        let types = Arc::new(CountingTypes::default());
        let actions = actions(true, manifest.clone(), types.clone());

        run(&actions, SettledPass { pass: 0, failed: false }).await;

        assert_eq!(manifest.calls.load(Ordering::SeqCst), 1);
        assert_eq!(types.calls.load(Ordering::SeqCst), 1);
    }
}
