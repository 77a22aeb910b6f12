//! Node tool resolution

use std::path::{Path, PathBuf};

/// Locate a Node CLI tool for a project.
///
/// Prefers the project-local `node_modules/.bin/<name>` and falls back to
/// the bare name so the OS searches `PATH`.
pub fn resolve_node_bin(working_dir: &Path, name: &str) -> PathBuf {
    let bin_dir = working_dir.join("node_modules").join(".bin");

    #[cfg(windows)]
    let local = bin_dir.join(format!("{}.cmd", name));
    #[cfg(not(windows))]
    let local = bin_dir.join(name);

    if local.exists() {
        return local;
    }

    PathBuf::from(name)
}
