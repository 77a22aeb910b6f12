//! Output Clearing
//!
//! Removes generated paths before a build starts.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// Error type for clearing output paths
#[derive(Debug, thiserror::Error)]
#[error("Failed to remove {path}: {source}")]
pub struct ClearError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Remove each path (relative to `working_dir`) recursively.
///
/// Paths that do not exist are skipped, so clearing twice is harmless.
pub async fn clear<P: AsRef<Path>>(working_dir: &Path, paths: &[P]) -> Result<(), ClearError> {
    for path in paths {
        let path = working_dir.join(path.as_ref());

        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Nothing to clear at {}", path.display());
                continue;
            }
            Err(source) => return Err(ClearError { path, source }),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => debug!("Cleared {}", path.display()),
            // Raced with another deletion
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ClearError { path, source }),
        }
    }

    Ok(())
}
