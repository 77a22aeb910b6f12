//! esbuild CLI compiler

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use neo_build_tasks::resolve_node_bin;
use tokio::process::Command;
use tracing::debug;

use super::{CompileJob, Compiler, CompilerError, DEV_LABEL, PassReport};

/// Compiler that runs one `esbuild` invocation per pass
#[derive(Debug, Clone, Default)]
pub struct EsbuildCompiler {
    /// Explicit esbuild binary (defaults to node_modules/.bin, then PATH)
    binary: Option<PathBuf>,
}

impl EsbuildCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    fn binary_path(&self, job: &CompileJob) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| resolve_node_bin(&job.working_dir, "esbuild"))
    }

    /// Command-line arguments for a job
    pub fn args(job: &CompileJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![job.entry.clone().into_os_string()];

        if job.bundle {
            args.push("--bundle".into());
        }

        let mut outfile = OsString::from("--outfile=");
        outfile.push(&job.outfile);
        args.push(outfile);

        args.push(format!("--format={}", job.format.as_str()).into());
        args.push(format!("--platform={}", job.platform.as_str()).into());
        args.push(format!("--target={}", job.runtime_target).into());

        if job.production_strip {
            args.push(format!("--drop-labels={}", DEV_LABEL).into());
        }
        if job.minify {
            args.push("--minify".into());
        }
        if job.sourcemap {
            args.push("--sourcemap".into());
        }

        args.push("--log-level=error".into());
        args.push("--color=false".into());
        args
    }
}

/// Pull error messages out of esbuild's stderr.
///
/// Each error starts with an `✘ [ERROR]` header and is usually followed by
/// an indented `file:line:col:` location, which is folded into the message.
pub fn parse_errors(stderr: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut current: Option<(String, Option<String>)> = None;

    for line in stderr.lines() {
        if let Some(message) = error_header(line) {
            if let Some(done) = current.take() {
                errors.push(format_error(done));
            }
            current = Some((message.trim().to_string(), None));
            continue;
        }

        if let Some((_, location)) = current.as_mut() {
            let trimmed = line.trim();
            if location.is_none() && is_location(trimmed) {
                *location = Some(trimmed.trim_end_matches(':').to_string());
            }
        }
    }

    if let Some(done) = current.take() {
        errors.push(format_error(done));
    }

    errors
}

fn error_header(line: &str) -> Option<&str> {
    let line = line.trim_start();
    ["✘ [ERROR]", "X [ERROR]", "[ERROR]"]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
}

fn is_location(line: &str) -> bool {
    // "src/server/index.ts:1:20:"
    let Some(body) = line.strip_suffix(':') else {
        return false;
    };
    let mut parts = body.rsplitn(3, ':');
    let column = parts.next().unwrap_or_default();
    let row = parts.next().unwrap_or_default();
    let file = parts.next().unwrap_or_default();
    !file.is_empty()
        && !column.is_empty()
        && !row.is_empty()
        && column.chars().all(|c| c.is_ascii_digit())
        && row.chars().all(|c| c.is_ascii_digit())
}

fn format_error((message, location): (String, Option<String>)) -> String {
    match location {
        Some(location) => format!("{}: {}", location, message),
        None => message,
    }
}

#[async_trait]
impl Compiler for EsbuildCompiler {
    async fn compile(&self, job: &CompileJob) -> Result<PassReport, CompilerError> {
        let binary = self.binary_path(job);
        let started = Instant::now();

        debug!("Running {} for {}", binary.display(), job.target);

        let output = Command::new(&binary)
            .args(Self::args(job))
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CompilerError::Launch {
                program: binary.display().to_string(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors = parse_errors(&stderr);

        if !output.status.success() && errors.is_empty() {
            let detail = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("esbuild failed ({})", output.status));
            errors.push(detail);
        }

        Ok(PassReport {
            errors,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::{Target, TargetName};

    fn job(production: bool) -> CompileJob {
        let target = Target::default_for(TargetName::Server, Path::new("src"), Path::new("dist"));
        CompileJob::for_target(&target, Path::new("/tmp"), production)
    }

    fn args_as_strings(job: &CompileJob) -> Vec<String> {
        EsbuildCompiler::args(job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_production_args() {
        let args = args_as_strings(&job(true));

        assert_eq!(args[0], "src/server/index.ts");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--outfile=dist/server.js".to_string()));
        assert!(args.contains(&"--format=cjs".to_string()));
        assert!(args.contains(&"--platform=node".to_string()));
        assert!(args.contains(&"--target=node18".to_string()));
        assert!(args.contains(&"--drop-labels=DEV".to_string()));
        assert!(args.contains(&"--minify".to_string()));
        assert!(!args.contains(&"--sourcemap".to_string()));
    }

    #[test]
    fn test_development_args() {
        let args = args_as_strings(&job(false));

        assert!(args.contains(&"--sourcemap".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--drop-labels")));
        assert!(!args.contains(&"--minify".to_string()));
    }

    #[test]
    fn test_parse_errors_with_locations() {
        let stderr = "\
✘ [ERROR] Could not resolve \"./missing\"

    src/server/index.ts:1:20:
      1 │ import { x } from \"./missing\";
        ╵                     ~~~~~~~~~~~

✘ [ERROR] Expected \";\" but found \"}\"

    src/client/index.ts:4:2:
      4 │ }}
        ╵   ^

2 errors
";
        let errors = parse_errors(stderr);
        assert_eq!(
            errors,
            vec![
                "src/server/index.ts:1:20: Could not resolve \"./missing\"".to_string(),
                "src/client/index.ts:4:2: Expected \";\" but found \"}\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_errors_without_location() {
        let errors = parse_errors("X [ERROR] Must use \"outdir\" when there are multiple input files\n");
        assert_eq!(errors, vec!["Must use \"outdir\" when there are multiple input files"]);
    }

    #[test]
    fn test_parse_errors_ignores_warnings() {
        assert!(parse_errors("▲ [WARNING] Duplicate key \"a\"\n\n1 warning\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_error() {
        let compiler = EsbuildCompiler::new().with_binary("/nonexistent/esbuild");
        let result = compiler.compile(&job(false)).await;
        assert!(matches!(result, Err(CompilerError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_without_output_still_reports_error() {
        let compiler = EsbuildCompiler::new().with_binary("false");
        let report = compiler.compile(&job(false)).await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(!report.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_is_success() {
        let compiler = EsbuildCompiler::new().with_binary("true");
        let report = compiler.compile(&job(true)).await.unwrap();
        assert!(report.is_success());
    }
}
