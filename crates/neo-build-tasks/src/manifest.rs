//! Plugin Manifest Generation
//!
//! Derives `dist/neo-plugin.json` from the `neo-plugin.json` at the plugin
//! root. The Neo server prefers the `dist/` copy when loading a plugin, so
//! this file is what a running server actually sees.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

/// Name of the manifest file, both as source and as output
pub const MANIFEST_FILE: &str = "neo-plugin.json";

/// Error type for manifest generation
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Plugin manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read or write manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid plugin manifest: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Something that regenerates the plugin manifest after a build settles
#[async_trait]
pub trait ManifestTask: Send + Sync {
    /// Regenerate the manifest, returning the path written
    async fn generate(&self, working_dir: &Path, production: bool)
    -> Result<PathBuf, ManifestError>;
}

/// Source manifest as authored by the plugin developer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceManifest {
    /// Unique plugin identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Everything else (services, nodes, description...) passes through
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Manifest written to the output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedManifest {
    #[serde(flatten)]
    pub source: SourceManifest,
    /// True for watch-mode builds
    pub dev: bool,
    #[serde(rename = "builtAt")]
    pub built_at: DateTime<Utc>,
}

/// Default manifest task: reads `<cwd>/neo-plugin.json`, writes
/// `<cwd>/<out_dir>/neo-plugin.json`
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    out_dir: PathBuf,
}

impl ManifestGenerator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Build the output manifest from source JSON
    pub fn derive(source: &str, production: bool) -> Result<GeneratedManifest, ManifestError> {
        let mut source: SourceManifest = serde_json::from_str(source)?;

        // Generated keys always win over anything hand-written
        source.rest.remove("dev");
        source.rest.remove("builtAt");

        Ok(GeneratedManifest {
            source,
            dev: !production,
            built_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ManifestTask for ManifestGenerator {
    async fn generate(
        &self,
        working_dir: &Path,
        production: bool,
    ) -> Result<PathBuf, ManifestError> {
        let source_path = working_dir.join(MANIFEST_FILE);
        if !source_path.exists() {
            return Err(ManifestError::NotFound(source_path));
        }

        let content = fs::read_to_string(&source_path).await?;
        let manifest = Self::derive(&content, production)?;

        let out_dir = working_dir.join(&self.out_dir);
        fs::create_dir_all(&out_dir).await?;

        let out_path = out_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&out_path, json).await?;

        debug!(
            "Wrote manifest for {} ({}) to {}",
            manifest.source.name,
            manifest.source.id,
            out_path.display()
        );

        Ok(out_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"{
        "id": "weather",
        "name": "Weather Plugin",
        "services": [{ "id": "weather/poller", "entry": "server.js" }],
        "dev": false
    }"#;

    #[test]
    fn test_derive_keeps_unknown_fields() {
        let manifest = ManifestGenerator::derive(SOURCE, false).unwrap();

        assert_eq!(manifest.source.id, "weather");
        assert!(manifest.dev);
        assert!(manifest.source.rest.contains_key("services"));
        assert!(!manifest.source.rest.contains_key("dev"));
    }

    #[test]
    fn test_derive_requires_id_and_name() {
        let result = ManifestGenerator::derive(r#"{ "name": "No Id" }"#, true);
        assert!(matches!(result, Err(ManifestError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_generate_writes_into_out_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), SOURCE).unwrap();

        let generator = ManifestGenerator::new("dist");
        let path = generator.generate(dir.path(), true).await.unwrap();

        assert_eq!(path, dir.path().join("dist").join(MANIFEST_FILE));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["id"], "weather");
        assert_eq!(written["dev"], false);
        assert!(written["builtAt"].is_string());
        assert_eq!(written["services"][0]["entry"], "server.js");
    }

    #[tokio::test]
    async fn test_generate_without_source_fails() {
        let dir = tempfile::tempdir().unwrap();

        let result = ManifestGenerator::new("dist").generate(dir.path(), false).await;
        assert!(matches!(result, Err(ManifestError::NotFound(_))));
        assert!(!dir.path().join("dist").exists());
    }
}
