//! Type Declaration Generation
//!
//! Runs `tsc` once per source directory to emit `.d.ts` files under
//! `<out_dir>/types/<dir-name>`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::node::resolve_node_bin;

/// Error type for declaration generation of one directory
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("No tsconfig.json in {0}")]
    MissingProject(PathBuf),

    #[error("Failed to run tsc: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("tsc failed for {dir} (exit code {code:?}): {output}")]
    Failed {
        dir: PathBuf,
        code: Option<i32>,
        output: String,
    },
}

/// Result of generating declarations for one source directory
#[derive(Debug)]
pub struct TypesOutcome {
    pub dir: PathBuf,
    pub result: Result<PathBuf, TypesError>,
}

/// Something that emits declarations for a set of source directories
#[async_trait]
pub trait TypesTask: Send + Sync {
    /// Generate declarations for every directory; one outcome per directory
    async fn generate(&self, working_dir: &Path, source_dirs: &[PathBuf]) -> Vec<TypesOutcome>;
}

/// Default types task backed by the TypeScript compiler
#[derive(Debug, Clone)]
pub struct TypesGenerator {
    out_dir: PathBuf,
    /// Explicit tsc binary (defaults to node_modules/.bin, then PATH)
    tsc: Option<PathBuf>,
}

impl TypesGenerator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            tsc: None,
        }
    }

    pub fn with_tsc(mut self, path: impl Into<PathBuf>) -> Self {
        self.tsc = Some(path.into());
        self
    }

    /// Directory declarations for `source_dir` are written to
    pub fn declaration_dir(&self, working_dir: &Path, source_dir: &Path) -> PathBuf {
        let name = source_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "root".into());
        working_dir.join(&self.out_dir).join("types").join(name)
    }

    async fn generate_one(&self, working_dir: &Path, source_dir: &Path) -> Result<PathBuf, TypesError> {
        let project_dir = working_dir.join(source_dir);
        if !project_dir.join("tsconfig.json").exists() {
            return Err(TypesError::MissingProject(project_dir));
        }

        let tsc = self
            .tsc
            .clone()
            .unwrap_or_else(|| resolve_node_bin(working_dir, "tsc"));
        let declaration_dir = self.declaration_dir(working_dir, source_dir);

        debug!(
            "Running {} for {}",
            tsc.display(),
            project_dir.display()
        );

        let output = Command::new(&tsc)
            .current_dir(working_dir)
            .arg("-p")
            .arg(&project_dir)
            .arg("--declaration")
            .arg("--emitDeclarationOnly")
            .arg("--outDir")
            .arg(&declaration_dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(declaration_dir);
        }

        // tsc reports diagnostics on stdout
        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }

        Err(TypesError::Failed {
            dir: project_dir,
            code: output.status.code(),
            output: text,
        })
    }
}

#[async_trait]
impl TypesTask for TypesGenerator {
    async fn generate(&self, working_dir: &Path, source_dirs: &[PathBuf]) -> Vec<TypesOutcome> {
        let mut outcomes = Vec::with_capacity(source_dirs.len());
        for dir in source_dirs {
            let result = self.generate_one(working_dir, dir).await;
            outcomes.push(TypesOutcome {
                dir: dir.clone(),
                result,
            });
        }
        outcomes
    }
}
