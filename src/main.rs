//! Vigil - Host Component Guardian
//!
//! Self-healing daemon for host component health. Watches a diagnostic
//! event feed and the component inventory, repairing what a restart can
//! fix and isolating what it cannot, with a recovery checkpoint before
//! every destructive step.
//!
//! # Usage
//!
//! ```bash
//! # Watch a JSONL diagnostic event feed
//! vigil --events /var/log/host-events.jsonl
//!
//! # Pipe events in from a collector
//! event-collector | vigil --events -
//!
//! # No feed: inventory scans only
//! vigil --config /etc/vigil/vigil.toml
//!
//! # Maintenance: inspect and roll back recovery points
//! vigil --list-checkpoints
//! vigil --restore 1736250000123
//! ```
//!
//! # Environment Variables
//!
//! - `VIGIL_CONFIG`: Config file path when `--config` is not given
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vigil::adapters::local::{
    DryRunDcomController, DryRunDriverController, DryRunServiceController, FsBackupStore,
    IdleEventSource, JsonlEventSource, LogNotifier, ManifestInspector, StdinEventSource,
};
use vigil::adapters::Controllers;
use vigil::{
    ComponentTable, GuardianConfig, GuardianContext, RecoveryStore, RetentionPolicy,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Vigil Host Component Guardian")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file.
    /// Falls back to $VIGIL_CONFIG, then ./vigil.toml, then defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory (recovery store, backups, quarantine)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Diagnostic event feed: a JSONL file path, or "-" for stdin.
    /// Omit to run on inventory scans alone.
    #[arg(long, value_name = "PATH")]
    events: Option<String>,

    /// List stored recovery points and exit
    #[arg(long)]
    list_checkpoints: bool,

    /// Restore the recovery point with this timestamp and exit
    #[arg(long, value_name = "TIMESTAMP")]
    restore: Option<u64>,
}

// ============================================================================
// Maintenance Mode
// ============================================================================

/// Offline recovery-store operations. Runs against the same store the
/// daemon uses; never run while a daemon instance is live on the same
/// data directory.
async fn run_maintenance(config: &GuardianConfig, args: &CliArgs) -> Result<()> {
    let data_dir = &config.recovery.data_dir;
    let backup = Arc::new(
        FsBackupStore::open(data_dir.join("backups"))
            .await
            .context("Failed to open backup store")?,
    );
    let store = RecoveryStore::open(
        &data_dir.join("recovery.db"),
        backup,
        RetentionPolicy {
            keep: config.recovery.retention,
            max_age_days: config.recovery.max_age_days,
        },
        Duration::from_millis(config.recovery.backup_timeout_ms),
    )
    .context("Failed to open recovery store")?;

    if let Some(timestamp) = args.restore {
        let table = ComponentTable::new();
        let point = store
            .restore(timestamp, &table)
            .await
            .with_context(|| format!("Restore of point {timestamp} failed"))?;

        println!("Restored recovery point {timestamp}");
        println!("  Description: {}", point.description);
        if let Some(at) = point.created_at() {
            println!("  Created:     {}", at.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        }
        println!("  Components:  {}", point.components.len());
        for record in table.snapshot() {
            println!("    {:<40} {:?}", record.id.to_string(), record.status);
        }

        let pruned = store.prune().await.context("Retention prune after restore failed")?;
        if pruned > 0 {
            println!("  Pruned:      {pruned} old point(s)");
        }
        return Ok(());
    }

    let points = store.list();
    if points.is_empty() {
        println!("No recovery points stored.");
        return Ok(());
    }
    println!("{} recovery point(s), newest first:", points.len());
    for point in points {
        let created = point
            .created_at()
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        let backup = match &point.backup {
            vigil::types::BackupRef::Stored(handle) => handle.clone(),
            vigil::types::BackupRef::Failed => "(no backup)".to_string(),
        };
        println!(
            "  {:<15} {}  components={:<3} backup={}  {}",
            point.timestamp,
            created,
            point.components.len(),
            backup,
            point.description
        );
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let (mut config, watch_path) = GuardianConfig::load(args.config.as_deref())?;
    if let Some(dir) = &args.data_dir {
        config.recovery.data_dir.clone_from(dir);
    }

    // Maintenance commands run and exit without starting the daemon.
    if args.list_checkpoints || args.restore.is_some() {
        return run_maintenance(&config, &args).await;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Vigil - Host Component Guardian");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");
    info!(
        "  Inventory: {} component(s) | Retry budget: {} per {}s window",
        config.inventory.len(),
        config.retry.max_attempts,
        config.retry.window_secs
    );
    info!("  Data directory: {}", config.recovery.data_dir.display());
    match &watch_path {
        Some(path) => info!("  Config: {} (watching for changes)", path.display()),
        None => info!("  Config: built-in defaults"),
    }
    info!("");

    let data_dir = config.recovery.data_dir.clone();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // Platform collaborators. The shipped binary runs the dry-run
    // controllers; deployments swap in platform-specific implementations.
    let backup = Arc::new(
        FsBackupStore::open(data_dir.join("backups"))
            .await
            .context("Failed to open backup store")?,
    );
    let controllers = Controllers {
        services: Arc::new(DryRunServiceController),
        drivers: Arc::new(DryRunDriverController::new(data_dir.join("quarantine"))),
        dcom: Arc::new(DryRunDcomController),
        notifier: Arc::new(LogNotifier),
    };
    let inspector = Arc::new(ManifestInspector::from_inventory(&config.inventory));

    let context = GuardianContext::init(config, backup, controllers)?;

    match args.events.as_deref() {
        Some("-") => {
            info!("📥 Input: stdin (JSONL diagnostic events)");
            context.run(StdinEventSource::new(), inspector, watch_path, cancel_token).await?;
        }
        Some(path) => {
            info!("📥 Input: JSONL feed ({path})");
            let source = JsonlEventSource::open(std::path::Path::new(path))
                .await
                .with_context(|| format!("Failed to open event feed {path}"))?;
            context.run(source, inspector, watch_path, cancel_token).await?;
        }
        None => {
            info!("📥 Input: none (inventory scans only)");
            context.run(IdleEventSource, inspector, watch_path, cancel_token).await?;
        }
    }

    info!("");
    info!("✓ Vigil shutdown complete");
    Ok(())
}
