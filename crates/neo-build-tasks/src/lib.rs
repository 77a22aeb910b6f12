//! Neo Build Tasks
//!
//! Side-effect steps that run around a plugin build:
//! - Clearing generated output directories
//! - Generating the plugin manifest from `neo-plugin.json`
//! - Emitting TypeScript declarations through `tsc`
//!
//! The orchestrator in `neo-build` only sees these through the
//! [`ManifestTask`] and [`TypesTask`] traits so tests can swap them out.

pub mod clear;
pub mod manifest;
pub mod node;
pub mod types;

pub use clear::{ClearError, clear};
pub use manifest::{ManifestError, ManifestGenerator, ManifestTask};
pub use node::resolve_node_bin;
pub use types::{TypesError, TypesGenerator, TypesOutcome, TypesTask};
