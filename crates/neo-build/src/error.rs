//! Error types for build orchestration.

use neo_build_tasks::ClearError;

use crate::compiler::CompilerError;
use crate::config::{ConfigError, TargetName};
use crate::external::ProcessError;

/// Fatal errors that abort an orchestrator run
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Build of {target} failed with {} error(s): {}", .errors.len(), .errors.join("; "))]
    Compile {
        target: TargetName,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Compiler(#[from] CompilerError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to clear output: {0}")]
    Clear(#[from] ClearError),

    #[error("Failed to start file watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("All target supervisors stopped")]
    ChannelClosed,
}

/// Result type for orchestration
pub type BuildResult<T> = Result<T, BuildError>;
