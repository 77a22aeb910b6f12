//! Build Configuration
//!
//! `neo-build.toml` (optional) describes the targets, the web sub-project
//! and the watch behaviour. [`BuildOptions`] is the resolved, immutable view
//! the orchestrator runs with.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default config file name, looked up in the plugin directory
pub const CONFIG_FILE: &str = "neo-build.toml";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Target '{0}' is configured more than once")]
    DuplicateTarget(TargetName),

    #[error("Command for {0} is empty")]
    EmptyCommand(&'static str),
}

// ─────────────────────────────────────────────────────────────────────────────
// Targets
// ─────────────────────────────────────────────────────────────────────────────

/// One independently compiled output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetName {
    Server,
    Client,
}

impl TargetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetName::Server => "server",
            TargetName::Client => "client",
        }
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform the bundle runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Node,
    Browser,
    Neutral,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Node => "node",
            Platform::Browser => "browser",
            Platform::Neutral => "neutral",
        }
    }
}

/// Output module format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Cjs,
    Esm,
    Iife,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Cjs => "cjs",
            Format::Esm => "esm",
            Format::Iife => "iife",
        }
    }
}

/// How a single target is compiled. Paths are relative to the plugin dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub entry: PathBuf,
    pub outfile: PathBuf,
    pub platform: Platform,
    pub format: Format,
    /// Language level handed to the bundler (e.g. `node18`, `es2020`)
    pub runtime_target: String,
}

/// A configured compilation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: TargetName,
    pub compile: CompileOptions,
}

impl Target {
    /// Default settings for a target name
    pub fn default_for(name: TargetName, src_dir: &Path, out_dir: &Path) -> Self {
        let compile = match name {
            TargetName::Server => CompileOptions {
                entry: src_dir.join("server").join("index.ts"),
                outfile: out_dir.join("server.js"),
                platform: Platform::Node,
                format: Format::Cjs,
                runtime_target: "node18".to_string(),
            },
            TargetName::Client => CompileOptions {
                entry: src_dir.join("client").join("index.ts"),
                outfile: out_dir.join("client.js"),
                platform: Platform::Browser,
                format: Format::Iife,
                runtime_target: "es2020".to_string(),
            },
        };
        Self { name, compile }
    }

    /// The fixed server/client pair used when no targets are configured
    pub fn defaults(src_dir: &Path, out_dir: &Path) -> Vec<Self> {
        vec![
            Self::default_for(TargetName::Server, src_dir, out_dir),
            Self::default_for(TargetName::Client, src_dir, out_dir),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config file
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of `neo-build.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_src_dir")]
    pub src_dir: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Regenerate dist/neo-plugin.json after each settled pass
    #[serde(default = "default_true")]
    pub manifest: bool,
    /// Emit declarations after production builds
    #[serde(default = "default_true")]
    pub types: bool,
    /// Targets in build order; empty means server then client
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_src_dir() -> PathBuf {
    PathBuf::from("src")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_true() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            src_dir: default_src_dir(),
            out_dir: default_out_dir(),
            manifest: true,
            types: true,
            targets: Vec::new(),
            web: WebConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Per-target overrides; anything unset falls back to the target's defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: TargetName,
    pub entry: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
    pub platform: Option<Platform>,
    pub format: Option<Format>,
    pub runtime_target: Option<String>,
}

/// Web sub-project settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_dir")]
    pub dir: PathBuf,
    /// Force the web build on or off; unset means "if the dir exists"
    pub enabled: Option<bool>,
    #[serde(default = "default_web_build")]
    pub build: Vec<String>,
    #[serde(default = "default_web_dev_server")]
    pub dev_server: Vec<String>,
    /// Companion watch-build process run next to the dev server
    pub watch_build: Option<Vec<String>>,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_web_dir() -> PathBuf {
    PathBuf::from("web")
}

fn default_web_build() -> Vec<String> {
    vec!["npx".into(), "vite".into(), "build".into()]
}

fn default_web_dev_server() -> Vec<String> {
    vec!["npx".into(), "vite".into()]
}

fn default_grace_period_ms() -> u64 {
    2000
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            dir: default_web_dir(),
            enabled: None,
            build: default_web_build(),
            dev_server: default_web_dev_server(),
            watch_build: None,
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// Source watching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// File-name globs that never trigger a rebuild
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_ignore() -> Vec<String> {
    vec!["*.d.ts".into(), "*~".into(), "*.swp".into(), ".#*".into()]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore: default_ignore(),
        }
    }
}

impl BuildConfig {
    /// Load the config for a plugin directory.
    ///
    /// An explicit path must exist; the default `neo-build.toml` is optional.
    pub fn load(working_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                let path = working_dir.join(path);
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                path
            }
            None => {
                let path = working_dir.join(CONFIG_FILE);
                if !path.exists() {
                    debug!("No {} found, using defaults", CONFIG_FILE);
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        debug!("Loaded build config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved options
// ─────────────────────────────────────────────────────────────────────────────

/// Command-line overrides applied on top of the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub production: bool,
    pub web: Option<bool>,
    pub manifest: Option<bool>,
    pub types: Option<bool>,
}

/// A program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn from_parts(parts: &[String], what: &'static str) -> Result<Self, ConfigError> {
        let (program, args) = parts.split_first().ok_or(ConfigError::EmptyCommand(what))?;
        Ok(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Resolved web sub-project settings; only present when the web build runs
#[derive(Debug, Clone)]
pub struct WebOptions {
    /// Absolute path of the web sub-project
    pub dir: PathBuf,
    pub build: CommandSpec,
    pub dev_server: CommandSpec,
    pub watch_build: Option<CommandSpec>,
    pub grace_period: Duration,
}

/// Resolved watch settings
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub ignore: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        let config = WatchConfig::default();
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            ignore: config.ignore,
        }
    }
}

/// Run-wide options, fixed for the lifetime of one orchestrator run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub working_dir: PathBuf,
    pub src_dir: PathBuf,
    pub out_dir: PathBuf,
    pub production: bool,
    pub targets: Vec<Target>,
    pub manifest: bool,
    pub types: bool,
    pub web: Option<WebOptions>,
    pub watch: WatchOptions,
}

impl BuildOptions {
    /// Combine the config file, CLI overrides and the filesystem
    pub fn resolve(
        working_dir: impl Into<PathBuf>,
        config: BuildConfig,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let working_dir = working_dir.into();
        let targets = resolve_targets(&config)?;

        let web_dir = working_dir.join(&config.web.dir);
        let include_web = overrides
            .web
            .or(config.web.enabled)
            .unwrap_or_else(|| web_dir.is_dir());

        let web = if include_web {
            Some(WebOptions {
                dir: web_dir,
                build: CommandSpec::from_parts(&config.web.build, "web build")?,
                dev_server: CommandSpec::from_parts(&config.web.dev_server, "web dev server")?,
                watch_build: config
                    .web
                    .watch_build
                    .as_deref()
                    .map(|parts| CommandSpec::from_parts(parts, "web watch build"))
                    .transpose()?,
                grace_period: Duration::from_millis(config.web.grace_period_ms),
            })
        } else {
            None
        };

        Ok(Self {
            working_dir,
            src_dir: config.src_dir,
            out_dir: config.out_dir,
            production: overrides.production,
            targets,
            manifest: overrides.manifest.unwrap_or(config.manifest),
            types: overrides.types.unwrap_or(config.types),
            web,
            watch: WatchOptions {
                debounce: Duration::from_millis(config.watch.debounce_ms),
                ignore: config.watch.ignore,
            },
        })
    }

    /// Target names in build order
    pub fn target_names(&self) -> Vec<TargetName> {
        self.targets.iter().map(|t| t.name).collect()
    }

    /// Absolute path of the watched source directory
    pub fn source_root(&self) -> PathBuf {
        self.working_dir.join(&self.src_dir)
    }

    /// Directories handed to the types generator: the parent of each entry
    pub fn type_source_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for target in &self.targets {
            if let Some(parent) = target.compile.entry.parent() {
                let parent = parent.to_path_buf();
                if !dirs.contains(&parent) {
                    dirs.push(parent);
                }
            }
        }
        dirs
    }
}

fn resolve_targets(config: &BuildConfig) -> Result<Vec<Target>, ConfigError> {
    if config.targets.is_empty() {
        return Ok(Target::defaults(&config.src_dir, &config.out_dir));
    }

    let mut targets: Vec<Target> = Vec::with_capacity(config.targets.len());
    for entry in &config.targets {
        if targets.iter().any(|t| t.name == entry.name) {
            return Err(ConfigError::DuplicateTarget(entry.name));
        }

        let mut target = Target::default_for(entry.name, &config.src_dir, &config.out_dir);
        if let Some(entry_path) = &entry.entry {
            target.compile.entry = entry_path.clone();
        }
        if let Some(outfile) = &entry.outfile {
            target.compile.outfile = outfile.clone();
        }
        if let Some(platform) = entry.platform {
            target.compile.platform = platform;
        }
        if let Some(format) = entry.format {
            target.compile.format = format;
        }
        if let Some(runtime_target) = &entry.runtime_target {
            target.compile.runtime_target = runtime_target.clone();
        }
        targets.push(target);
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_server_then_client() {
        let options =
            BuildOptions::resolve("/plugin", BuildConfig::default(), &Overrides::default()).unwrap();

        assert_eq!(options.target_names(), vec![TargetName::Server, TargetName::Client]);

        let server = &options.targets[0].compile;
        assert_eq!(server.platform, Platform::Node);
        assert_eq!(server.format, Format::Cjs);
        assert_eq!(server.entry, PathBuf::from("src/server/index.ts"));
        assert_eq!(server.outfile, PathBuf::from("dist/server.js"));

        let client = &options.targets[1].compile;
        assert_eq!(client.platform, Platform::Browser);
        assert_eq!(client.format, Format::Iife);
    }

    #[test]
    fn test_parse_target_overrides() {
        let config = BuildConfig::parse(
            r#"
            out_dir = "build"

            [[targets]]
            name = "client"
            format = "esm"

            [[targets]]
            name = "server"
            runtime_target = "node20"
            "#,
        )
        .unwrap();

        let options = BuildOptions::resolve("/plugin", config, &Overrides::default()).unwrap();
        assert_eq!(options.target_names(), vec![TargetName::Client, TargetName::Server]);
        assert_eq!(options.targets[0].compile.format, Format::Esm);
        assert_eq!(options.targets[0].compile.outfile, PathBuf::from("build/client.js"));
        assert_eq!(options.targets[1].compile.runtime_target, "node20");
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let config = BuildConfig::parse(
            r#"
            [[targets]]
            name = "server"

            [[targets]]
            name = "server"
            "#,
        )
        .unwrap();

        let result = BuildOptions::resolve("/plugin", config, &Overrides::default());
        assert!(matches!(result, Err(ConfigError::DuplicateTarget(TargetName::Server))));
    }

    #[test]
    fn test_web_detected_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        let options =
            BuildOptions::resolve(dir.path(), BuildConfig::default(), &Overrides::default()).unwrap();
        assert!(options.web.is_none());

        std::fs::create_dir(dir.path().join("web")).unwrap();
        let options =
            BuildOptions::resolve(dir.path(), BuildConfig::default(), &Overrides::default()).unwrap();
        let web = options.web.unwrap();
        assert_eq!(web.dir, dir.path().join("web"));
        assert_eq!(web.grace_period, Duration::from_secs(2));
        assert_eq!(web.dev_server.to_string(), "npx vite");
    }

    #[test]
    fn test_web_override_beats_detection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("web")).unwrap();

        let overrides = Overrides {
            web: Some(false),
            ..Default::default()
        };
        let options = BuildOptions::resolve(dir.path(), BuildConfig::default(), &overrides).unwrap();
        assert!(options.web.is_none());

        let mut config = BuildConfig::default();
        config.web.enabled = Some(true);
        config.web.dir = PathBuf::from("frontend");
        let options = BuildOptions::resolve(dir.path(), config, &Overrides::default()).unwrap();
        assert!(options.web.is_some());
    }

    #[test]
    fn test_empty_web_command_rejected() {
        let mut config = BuildConfig::default();
        config.web.enabled = Some(true);
        config.web.build = Vec::new();

        let result = BuildOptions::resolve("/plugin", config, &Overrides::default());
        assert!(matches!(result, Err(ConfigError::EmptyCommand("web build"))));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();

        assert!(BuildConfig::load(dir.path(), None).is_ok());
        assert!(matches!(
            BuildConfig::load(dir.path(), Some(Path::new("custom.toml"))),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_type_source_dirs_follow_entries() {
        let options =
            BuildOptions::resolve("/plugin", BuildConfig::default(), &Overrides::default()).unwrap();
        assert_eq!(
            options.type_source_dirs(),
            vec![PathBuf::from("src/server"), PathBuf::from("src/client")]
        );
    }
}
