//! Bundler Interface
//!
//! The orchestrator treats the bundler as a black box: hand it a
//! [`CompileJob`], get back a [`PassReport`] listing errors (empty on
//! success). The default implementation drives the `esbuild` CLI.

mod esbuild;

pub use esbuild::*;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Format, Platform, Target, TargetName};

/// Label of code blocks stripped from production bundles (`DEV: { ... }`)
pub const DEV_LABEL: &str = "DEV";

/// Errors that prevent a compiler from running at all
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bundler configuration for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob {
    pub target: TargetName,
    pub working_dir: PathBuf,
    pub entry: PathBuf,
    pub outfile: PathBuf,
    pub bundle: bool,
    pub format: Format,
    pub platform: Platform,
    pub runtime_target: String,
    /// Drop `DEV:` labeled blocks
    pub production_strip: bool,
    pub minify: bool,
    pub sourcemap: bool,
}

impl CompileJob {
    pub fn for_target(target: &Target, working_dir: &Path, production: bool) -> Self {
        Self {
            target: target.name,
            working_dir: working_dir.to_path_buf(),
            entry: target.compile.entry.clone(),
            outfile: target.compile.outfile.clone(),
            bundle: true,
            format: target.compile.format,
            platform: target.compile.platform,
            runtime_target: target.compile.runtime_target.clone(),
            production_strip: production,
            minify: production,
            sourcemap: !production,
        }
    }
}

/// Outcome of one compiler pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Error messages; empty on success
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A bundler that can compile one target per call
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, job: &CompileJob) -> Result<PassReport, CompilerError>;
}
