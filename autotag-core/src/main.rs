//! calibre-autotag - tag Calibre books with AI-generated tags.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autotag_core::{
    CalibreCatalog, Error, MergeMode, ProviderRegistry, ProviderSelection, ProviderSettings,
    RetryPolicy, RunOptions, TagOrchestrator, TaggingRun,
};

/// Command-line arguments for calibre-autotag
#[derive(Parser, Debug)]
#[command(name = "calibre-autotag")]
#[command(about = "Auto-tag Calibre books using AI")]
#[command(version)]
struct Args {
    /// Full path to the Calibre library folder
    #[arg(long, env = "CALIBRE_LIBRARY_PATH")]
    library_path: String,

    /// Limit the number of books to process
    #[arg(long)]
    limit: Option<usize>,

    /// Show what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Replace existing tags instead of appending
    #[arg(long)]
    overwrite: bool,

    /// Provider to use: all, gemini, openai or ollama
    #[arg(long, default_value = "all", env = "AUTOTAG_PROVIDER")]
    provider: ProviderSelection,

    /// Extra instruction appended to every prompt
    #[arg(long)]
    extra_instructions: Option<String>,

    /// Seconds to wait before retrying with the next API key
    #[arg(long, default_value_t = 2)]
    cooldown_secs: u64,

    /// Path to the calibredb executable
    #[arg(long, env = "CALIBREDB_BIN")]
    calibredb: Option<PathBuf>,

    /// In append mode, merge with the tags captured at listing time instead
    /// of re-reading them before each write
    #[arg(long)]
    no_refresh: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calibre_autotag=info,autotag_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut catalog = CalibreCatalog::new(&args.library_path);
    if !catalog.library_path().is_dir() {
        return Err(Error::config(format!(
            "library path not found at '{}'",
            catalog.library_path().display()
        ))
        .into());
    }
    if let Some(binary) = &args.calibredb {
        catalog = catalog.with_binary(binary);
    }
    info!("Accessing Calibre library at: {}", catalog.library_path().display());

    let settings = ProviderSettings::from_env();
    let local = settings
        .ollama_client()
        .context("Failed to create local model client")?;
    let registry = ProviderRegistry::configure(&settings, &local)
        .await
        .and_then(|registry| registry.select(args.provider))
        .map_err(|e| {
            error!(error = %e, "Cannot start tagging run");
            e
        })?;

    let orchestrator = TagOrchestrator::new(
        settings.backends().context("Failed to create provider clients")?,
        RetryPolicy::new(Duration::from_secs(args.cooldown_secs)),
    );

    let options = RunOptions {
        merge_mode: MergeMode::from_overwrite(args.overwrite),
        dry_run: args.dry_run,
        extra_instructions: args.extra_instructions,
        limit: args.limit,
        refresh_before_merge: !args.no_refresh,
    };
    if options.dry_run {
        info!("DRY RUN: no changes will be made to your library");
    }

    let summary = TaggingRun::new(Arc::new(catalog), orchestrator, registry, options)
        .run()
        .await
        .context("Tagging run aborted")?;

    info!(
        "Done: {} tagged, {} skipped, {} failed (of {})",
        summary.tagged, summary.skipped, summary.failed, summary.total
    );
    Ok(())
}
