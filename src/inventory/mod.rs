//! Inventory scan loop.
//!
//! Periodically asks the registry inspector for service/driver
//! inconsistencies and feeds them to the decision loop over a bounded
//! queue. A pass that reports nothing wrong also serves as evidence:
//! seeded components still unverified get promoted to healthy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::RegistryInspector;
use crate::table::ComponentTable;
use crate::types::{ComponentId, RegistryIssue};

/// Counters the scan loop reports on exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryStats {
    pub scans: u64,
    pub issues: u64,
    pub scan_errors: u64,
    pub promoted: u64,
}

pub struct InventoryScan {
    inspector: Arc<dyn RegistryInspector>,
    table: Arc<ComponentTable>,
    tx: mpsc::Sender<RegistryIssue>,
    interval: Duration,
    cancel: CancellationToken,
    stats: InventoryStats,
}

impl InventoryScan {
    pub fn new(
        inspector: Arc<dyn RegistryInspector>,
        table: Arc<ComponentTable>,
        tx: mpsc::Sender<RegistryIssue>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self { inspector, table, tx, interval, cancel, stats: InventoryStats::default() }
    }

    pub async fn run(mut self) -> InventoryStats {
        info!(interval_secs = self.interval.as_secs(), "Inventory scan starting");

        // First pass runs immediately; later passes follow the interval.
        loop {
            self.scan_once().await;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            scans = self.stats.scans,
            issues = self.stats.issues,
            promoted = self.stats.promoted,
            "Inventory scan stopped"
        );
        self.stats
    }

    async fn scan_once(&mut self) {
        self.stats.scans += 1;
        let mut issues = Vec::new();

        match self.inspector.scan_services().await {
            Ok(found) => issues.extend(found),
            Err(e) => {
                self.stats.scan_errors += 1;
                warn!(error = %e, "Service registry scan failed");
            }
        }
        match self.inspector.scan_drivers().await {
            Ok(found) => issues.extend(found),
            Err(e) => {
                self.stats.scan_errors += 1;
                warn!(error = %e, "Driver registry scan failed");
            }
        }

        // Anything the scan did not flag counts as verified present.
        let flagged: HashSet<ComponentId> =
            issues.iter().map(|issue| issue.component.clone()).collect();
        let promoted = self.table.promote_unknown(&flagged);
        if promoted > 0 {
            self.stats.promoted += promoted as u64;
            debug!(promoted, "Inventory components verified healthy");
        }

        self.stats.issues += issues.len() as u64;
        for issue in issues {
            match self.tx.try_send(issue) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(issue)) => {
                    // The next pass re-detects anything still broken.
                    warn!(component = %issue.component, "Issue queue full, finding dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("Decision loop gone, finding dropped");
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
