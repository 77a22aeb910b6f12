//! Neo Build
//!
//! Builds a Neo plugin once (`--production`) or keeps it rebuilt on change.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use neo_build::{BuildConfig, BuildOptions, Orchestrator, Overrides};

/// Neo plugin build tool
#[derive(Parser, Debug)]
#[command(name = "neo-build")]
#[command(about = "Build a Neo plugin, or rebuild it on every change", long_about = None)]
struct Args {
    /// One-shot minified build instead of watch mode
    #[arg(short, long)]
    production: bool,

    /// Plugin directory
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// Build config file (defaults to neo-build.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Always build the web sub-project
    #[arg(long, conflicts_with = "no_web")]
    web: bool,

    /// Never build the web sub-project
    #[arg(long)]
    no_web: bool,

    /// Don't generate the plugin manifest
    #[arg(long)]
    no_manifest: bool,

    /// Don't generate type declarations
    #[arg(long)]
    no_types: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            production: self.production,
            web: match (self.web, self.no_web) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            manifest: self.no_manifest.then_some(false),
            types: self.no_types.then_some(false),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "neo_build=debug,neo_build_tasks=debug"
    } else {
        "neo_build=info,neo_build_tasks=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Subprocess I/O and watch callbacks all run on one event loop
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    let working_dir = args
        .cwd
        .canonicalize()
        .with_context(|| format!("Plugin directory {} not found", args.cwd.display()))?;

    info!("Neo Build v{} in {}", env!("CARGO_PKG_VERSION"), working_dir.display());

    let config = BuildConfig::load(&working_dir, args.config.as_deref())
        .context("Failed to load build config")?;
    let options = BuildOptions::resolve(working_dir, config, &args.overrides())
        .context("Invalid build config")?;

    Orchestrator::new(options).run().await?;
    Ok(())
}
