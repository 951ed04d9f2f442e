//! Daemon context and lifecycle.
//!
//! [`GuardianContext::init`] builds every shared structure from one config
//! document; [`GuardianContext::run`] spawns the loop set and supervises
//! it, then records a final checkpoint on the way out. All state is owned
//! here and handed to tasks explicitly; there are no process-wide
//! singletons.

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{BackupStore, Controllers, EventSource, RegistryInspector};
use crate::config::{GuardianConfig, Policies, PolicyHandle};
use crate::engine::DecisionEngine;
use crate::ingest::{EventIngest, IngestCadence};
use crate::inventory::InventoryScan;
use crate::retry::{RetryLedger, RetryPolicy};
use crate::scheduler::{IsolationExecutor, IsolationScheduler};
use crate::storage::{RecoveryStore, RetentionPolicy};
use crate::table::ComponentTable;
use crate::types::{ComponentRecord, ComponentStatus};

/// Task identifiers for supervisor logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskName {
    EventIngest,
    InventoryScan,
    Decision,
    IsolationScheduler,
    PolicyWatch,
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventIngest => "EventIngest",
            Self::InventoryScan => "InventoryScan",
            Self::Decision => "Decision",
            Self::IsolationScheduler => "IsolationScheduler",
            Self::PolicyWatch => "PolicyWatch",
        };
        f.write_str(name)
    }
}

/// Shared state for one guardian deployment.
pub struct GuardianContext {
    pub config: GuardianConfig,
    pub policies: Arc<PolicyHandle>,
    pub table: Arc<ComponentTable>,
    pub recovery: Arc<RecoveryStore>,
    pub controllers: Controllers,
}

impl GuardianContext {
    /// Build shared state from configuration. Fails fast when policy does
    /// not compile or the recovery store cannot be opened.
    pub fn init(
        config: GuardianConfig,
        backup: Arc<dyn BackupStore>,
        controllers: Controllers,
    ) -> Result<Self> {
        let policies =
            PolicyHandle::new(Policies::compile(&config).context("Policy compile failed")?);

        let table = Arc::new(ComponentTable::new());
        for entry in &config.inventory {
            let id = entry.component_id();
            let impacts = policies.load().graph.impacts_of(&id).to_vec();
            table.seed(ComponentRecord {
                id,
                path: entry.path.clone(),
                content_hash: entry.content_hash.clone(),
                impacts,
                status: ComponentStatus::Unknown,
            });
        }

        let retention = RetentionPolicy {
            keep: config.recovery.retention,
            max_age_days: config.recovery.max_age_days,
        };
        let recovery = Arc::new(
            RecoveryStore::open(
                &config.recovery.data_dir.join("recovery.db"),
                backup,
                retention,
                Duration::from_millis(config.recovery.backup_timeout_ms),
            )
            .context("Failed to open recovery store")?,
        );

        let stats = recovery.stats();
        info!(
            components = table.len(),
            recovery_points = stats.point_count,
            "Guardian context initialized"
        );

        Ok(Self { config, policies, table, recovery, controllers })
    }

    /// Spawn the loop set and run until cancelled or a task fails. Returns
    /// after every task has wound down and the shutdown checkpoint is on
    /// disk.
    pub async fn run<S: EventSource + Sync>(
        self,
        source: S,
        inspector: Arc<dyn RegistryInspector>,
        watch_path: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self.recovery.prune().await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Pruned old recovery points at startup"),
            Err(e) => warn!(error = %e, "Startup recovery prune failed"),
        }

        let (event_tx, event_rx) = mpsc::channel(self.config.queues.raw_events);
        let (issue_tx, issue_rx) = mpsc::channel(self.config.queues.issues);

        let executor = Arc::new(IsolationExecutor {
            table: Arc::clone(&self.table),
            controllers: self.controllers.clone(),
            policies: Arc::clone(&self.policies),
        });
        let (scheduler, scheduler_handle) = IsolationScheduler::new(
            executor,
            self.config.queues.isolation,
            self.config.workers.max_concurrent_actions,
            cancel.clone(),
        );

        let mut tasks: JoinSet<Result<TaskName>> = JoinSet::new();

        // Event ingest
        let ingest = EventIngest::new(
            source,
            Arc::clone(&self.policies),
            event_tx,
            IngestCadence {
                poll_interval: Duration::from_secs(self.config.scan.event_poll_secs),
                error_backoff: Duration::from_secs(self.config.scan.event_error_backoff_secs),
            },
            cancel.clone(),
        );
        tasks.spawn(async move {
            info!("[EventIngest] Task starting");
            ingest.run().await;
            Ok(TaskName::EventIngest)
        });

        // Inventory scan
        let scan = InventoryScan::new(
            inspector,
            Arc::clone(&self.table),
            issue_tx,
            Duration::from_secs(self.config.scan.inventory_scan_secs),
            cancel.clone(),
        );
        tasks.spawn(async move {
            info!("[InventoryScan] Task starting");
            scan.run().await;
            Ok(TaskName::InventoryScan)
        });

        // Decision loop
        let engine = DecisionEngine::new(
            Arc::clone(&self.table),
            RetryLedger::new(RetryPolicy {
                max_attempts: self.config.retry.max_attempts,
                window: chrono::Duration::seconds(
                    i64::try_from(self.config.retry.window_secs).unwrap_or(i64::MAX),
                ),
            }),
            Arc::clone(&self.policies),
            Arc::clone(&self.recovery),
            scheduler_handle,
            self.controllers.clone(),
        );
        spawn_decision_loop(
            &mut tasks,
            engine,
            Arc::clone(&self.policies),
            event_rx,
            issue_rx,
            cancel.clone(),
        );

        // Isolation scheduler
        tasks.spawn(async move {
            info!("[IsolationScheduler] Task starting");
            scheduler.run().await;
            Ok(TaskName::IsolationScheduler)
        });

        // Config watcher (only when the config came from a file)
        if let Some(path) = watch_path {
            spawn_policy_watch(
                &mut tasks,
                path,
                Arc::clone(&self.policies),
                Duration::from_secs(self.config.scan.policy_watch_secs),
                cancel.clone(),
            );
        }

        let result = supervise(&mut tasks, cancel).await;

        // Final checkpoint so the post-run state is restorable too.
        match self.recovery.checkpoint(self.table.snapshot(), "Shutdown checkpoint").await {
            Ok(timestamp) => info!(timestamp, "Shutdown checkpoint recorded"),
            Err(e) => warn!(error = %e, "Shutdown checkpoint failed"),
        }
        if let Err(e) = self.recovery.flush() {
            warn!(error = %e, "Recovery store flush failed");
        }

        info!(
            components = self.table.len(),
            isolated = self.table.count_by_status(ComponentStatus::Isolated),
            "Guardian stopped"
        );
        result
    }
}

fn spawn_decision_loop(
    tasks: &mut JoinSet<Result<TaskName>>,
    mut engine: DecisionEngine,
    policies: Arc<PolicyHandle>,
    mut event_rx: mpsc::Receiver<crate::types::RawEvent>,
    mut issue_rx: mpsc::Receiver<crate::types::RegistryIssue>,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        info!("[Decision] Task starting");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = event_rx.recv() => match maybe {
                    Some(raw) => {
                        let event = policies.load().classifier.classify(&raw);
                        engine.handle_event(event).await;
                    }
                    None => break,
                },
                maybe = issue_rx.recv() => match maybe {
                    Some(issue) => engine.handle_issue(issue).await,
                    None => break,
                },
            }
        }
        let stats = engine.stats();
        info!(
            events = stats.events,
            issues = stats.issues,
            repairs = stats.repairs_attempted,
            repaired = stats.repairs_succeeded,
            isolations = stats.isolations_requested,
            checkpoints = stats.checkpoints,
            "[Decision] Task finished"
        );
        Ok(TaskName::Decision)
    });
}

/// Poll the config file's mtime; recompile and swap policies on change. A
/// document that fails to load or compile leaves the current bundle in
/// place.
fn spawn_policy_watch(
    tasks: &mut JoinSet<Result<TaskName>>,
    path: PathBuf,
    policies: Arc<PolicyHandle>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        info!(path = %path.display(), "[PolicyWatch] Task starting");
        let mut last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(error = %e, "Config file unreadable, keeping current policies");
                    continue;
                }
            };
            if last_modified == Some(modified) {
                continue;
            }
            last_modified = Some(modified);

            match GuardianConfig::load_from_file(&path) {
                Ok(config) => match Policies::compile(&config) {
                    Ok(fresh) => policies.swap(fresh),
                    Err(e) => warn!(error = %e, "Policy compile failed, keeping current policies"),
                },
                Err(e) => warn!(error = %e, "Config reload failed, keeping current policies"),
            }
        }
        Ok(TaskName::PolicyWatch)
    });
}

/// Wait for shutdown or the first task failure, then drain every task to
/// completion. Begun isolation actions are never aborted mid-flight; the
/// JoinSet is only dropped once it is empty.
async fn supervise(tasks: &mut JoinSet<Result<TaskName>>, cancel: CancellationToken) -> Result<()> {
    info!(tasks = tasks.len(), "Supervisor: all tasks spawned");
    let mut failure: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if failure.is_none() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            joined = tasks.join_next() => match joined {
                Some(Ok(Ok(task))) => info!("Supervisor: task {} completed", task),
                Some(Ok(Err(e))) => {
                    error!("Supervisor: task failed: {:#}", e);
                    cancel.cancel();
                    failure.get_or_insert(e);
                }
                Some(Err(e)) => {
                    error!("Supervisor: task panicked: {}", e);
                    cancel.cancel();
                    failure.get_or_insert_with(|| anyhow::anyhow!("task panicked: {e}"));
                }
                None => break,
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(task)) => info!("Supervisor: task {} completed", task),
            Ok(Err(e)) => {
                error!("Supervisor: task failed during shutdown: {:#}", e);
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!("Supervisor: task panicked during shutdown: {}", e);
                failure.get_or_insert_with(|| anyhow::anyhow!("task panicked: {e}"));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================
