//! Neo Build - plugin build orchestration
//!
//! This crate drives the build of a Neo plugin:
//! - Server and client targets compiled by esbuild, once or in watch mode
//! - The optional web sub-project (build, or dev server with readiness detection)
//! - Manifest and type declaration generation once every target has settled
//! - Clean shutdown of external processes on Ctrl+C / SIGTERM

// Run-wide options and neo-build.toml
pub mod config;

// Bundler interface and the esbuild CLI driver
pub mod compiler;

// Per-target supervision
pub mod target;

// Source watching
pub mod watch;

// Web sub-project processes
pub mod external;

// Pass aggregation and downstream actions
pub mod aggregator;
pub mod downstream;

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod shutdown;

pub use aggregator::{CompletionAggregator, SettledPass};
pub use config::{BuildConfig, BuildOptions, Overrides, Target, TargetName};
pub use error::{BuildError, BuildResult};
pub use events::BuildEvent;
pub use orchestrator::Orchestrator;
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
pub use target::{BuildStatus, PassComplete, TargetSupervisor};
