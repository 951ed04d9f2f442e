//! Decision engine: the component state machine.
//!
//! Consumes classified events and registry findings, one at a time, from
//! the decision loop. Warnings get in-place repair inside the retry
//! budget; errors cascade through the impact graph into isolation
//! requests; registry findings notify and checkpoint before escalating.
//! Every path that leads to destructive work records a recovery
//! checkpoint first.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::Controllers;
use crate::config::PolicyHandle;
use crate::retry::RetryLedger;
use crate::scheduler::SchedulerHandle;
use crate::storage::RecoveryStore;
use crate::table::ComponentTable;
use crate::types::{
    ClassifiedEvent, ComponentId, ComponentStatus, IsolationAction, IsolationPriority,
    IsolationRequest, RegistryIssue, RegistryIssueKind, Severity,
};

/// Counters the decision loop reports on exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub events: u64,
    pub issues: u64,
    pub repairs_attempted: u64,
    pub repairs_succeeded: u64,
    pub isolations_requested: u64,
    pub checkpoints: u64,
    pub unattributed: u64,
}

pub struct DecisionEngine {
    table: Arc<ComponentTable>,
    ledger: RetryLedger,
    policies: Arc<PolicyHandle>,
    recovery: Arc<RecoveryStore>,
    scheduler: SchedulerHandle,
    controllers: Controllers,
    stats: EngineStats,
}

fn component_label(component: Option<&ComponentId>) -> String {
    component.map_or_else(|| "unknown".to_string(), ToString::to_string)
}

impl DecisionEngine {
    pub fn new(
        table: Arc<ComponentTable>,
        ledger: RetryLedger,
        policies: Arc<PolicyHandle>,
        recovery: Arc<RecoveryStore>,
        scheduler: SchedulerHandle,
        controllers: Controllers,
    ) -> Self {
        Self {
            table,
            ledger,
            policies,
            recovery,
            scheduler,
            controllers,
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Process one classified event through the state machine.
    pub async fn handle_event(&mut self, event: ClassifiedEvent) {
        self.stats.events += 1;
        info!(
            source = %event.source,
            id = event.event_id,
            category = %event.category,
            component = %component_label(event.component.as_ref()),
            "Processing event"
        );
        match event.severity {
            Severity::Warning => self.handle_warning(event).await,
            Severity::Error => self.handle_error(event).await,
        }
    }

    async fn handle_warning(&mut self, event: ClassifiedEvent) {
        let Some(component) = event.component else {
            self.stats.unattributed += 1;
            debug!(source = %event.source, id = event.event_id, "Warning names no component, nothing to repair");
            return;
        };
        self.table.observe(&component, ComponentStatus::Healthy);
        if self.table.status(&component) == Some(ComponentStatus::Isolated) {
            debug!(component = %component, "Component already isolated, warning ignored");
            return;
        }

        let now = Utc::now();
        if !self.ledger.should_attempt_repair(&component, now) {
            info!(component = %component, "Retry budget exhausted, escalating to isolation");
            self.request_isolation(IsolationRequest::isolate(
                IsolationPriority::Elevated,
                component,
                format!("Max retries exceeded for warnings: {}", event.message),
            ));
            return;
        }

        self.stats.repairs_attempted += 1;
        let attempt = self.ledger.attempt_count(&component) + 1;
        debug!(component = %component, attempt, "Attempting in-place repair");

        let driver_source = self.policies.load().driver_map.get(&component.name).cloned();
        let succeeded = match self.controllers.repair(&component, driver_source.as_deref()).await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(component = %component, attempt, error = %e, "Repair attempt failed");
                false
            }
        };
        self.ledger.record_attempt(&component, now, succeeded);

        if succeeded {
            self.stats.repairs_succeeded += 1;
            info!(component = %component, "Component repaired in place");
            self.table.set_status(&component, ComponentStatus::Healthy);
        } else {
            self.table.set_status(&component, ComponentStatus::Degraded);
        }
    }

    async fn handle_error(&mut self, event: ClassifiedEvent) {
        let Some(origin) = event.component else {
            self.stats.unattributed += 1;
            warn!(
                source = %event.source,
                id = event.event_id,
                category = %event.category,
                "Error names no component, no isolation target"
            );
            return;
        };
        self.table.observe(&origin, ComponentStatus::Healthy);

        // Snapshot before anything destructive is even scheduled.
        self.checkpoint(&format!("Pre-isolation snapshot: {} ({})", origin, event.category))
            .await;

        let affected = self.policies.load().graph.affected_by(&origin);
        let mut targets: Vec<ComponentId> = affected.into_iter().collect();
        targets.sort();

        info!(origin = %origin, cascade = targets.len(), "Error event, isolating impact set");
        for target in targets {
            if self.table.status(&target) == Some(ComponentStatus::Isolated) {
                debug!(component = %target, "Already isolated, cascade entry skipped");
                continue;
            }
            self.request_isolation(IsolationRequest::isolate(
                IsolationPriority::Critical,
                target,
                format!("Cascading error from {}: {}", origin, event.message),
            ));
        }
    }

    /// Process one registry scan finding.
    pub async fn handle_issue(&mut self, issue: RegistryIssue) {
        self.stats.issues += 1;
        let component = issue.component;
        self.table.observe(&component, ComponentStatus::Degraded);
        if self.table.status(&component) == Some(ComponentStatus::Isolated) {
            debug!(component = %component, "Registry issue on isolated component, ignored");
            return;
        }

        match issue.kind {
            RegistryIssueKind::MissingBinary => {
                warn!(component = %component, path = %issue.path.display(), "Service binary missing");
                self.controllers
                    .notifier
                    .notify(
                        "Critical System Issue",
                        &format!("Service binary missing for {}", component.name),
                    )
                    .await;
                self.checkpoint(&format!("Pre-isolation snapshot: {component} (missing binary)"))
                    .await;
                self.request_isolation(IsolationRequest::isolate(
                    IsolationPriority::Critical,
                    component,
                    format!("Missing binary: {}", issue.path.display()),
                ));
            }
            RegistryIssueKind::DriverMissing => {
                warn!(component = %component, path = %issue.path.display(), "Driver file missing");
                self.controllers
                    .notifier
                    .notify(
                        "Driver Corruption Detected",
                        &format!("Missing driver file: {}", issue.path.display()),
                    )
                    .await;
                self.checkpoint(&format!("Pre-reinstall snapshot: {component} (missing driver)"))
                    .await;
                match self.controllers.drivers.quarantine(&component.name).await {
                    Ok(moved_to) => {
                        info!(
                            component = %component,
                            quarantined_to = %moved_to.display(),
                            "Driver artifact quarantined"
                        );
                        self.request_isolation(IsolationRequest {
                            priority: IsolationPriority::Critical,
                            component,
                            reason: format!("Missing driver: {}", issue.path.display()),
                            action: IsolationAction::Reinstall,
                        });
                    }
                    Err(e) => {
                        // Without quarantine the suspect artifact would be
                        // reinstalled over; stop here and leave the trail.
                        warn!(component = %component, error = %e, "Driver quarantine failed, no reinstall scheduled");
                    }
                }
            }
        }
    }

    async fn checkpoint(&mut self, description: &str) {
        match self.recovery.checkpoint(self.table.snapshot(), description).await {
            Ok(timestamp) => {
                self.stats.checkpoints += 1;
                debug!(timestamp, "Recovery checkpoint recorded");
                // Retention is enforced on append so the log stays bounded
                // between restarts.
                if let Err(e) = self.recovery.prune().await {
                    warn!(error = %e, "Recovery retention pass failed");
                }
            }
            // A failed checkpoint never blocks the action it precedes.
            Err(e) => warn!(error = %e, "Recovery checkpoint failed"),
        }
    }

    fn request_isolation(&mut self, request: IsolationRequest) {
        self.stats.isolations_requested += 1;
        self.scheduler.submit(request);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use crate::adapters::sim::{MemoryBackupStore, RecordingController, RecordingNotifier};
    use crate::config::{GuardianConfig, Policies};
    use crate::retry::RetryPolicy;
    use crate::storage::RetentionPolicy;
    use crate::types::EventCategory;

    struct Fixture {
        engine: DecisionEngine,
        requests: mpsc::Receiver<IsolationRequest>,
        controller: Arc<RecordingController>,
        notifier: Arc<RecordingNotifier>,
        table: Arc<ComponentTable>,
        recovery: Arc<RecoveryStore>,
        _dir: TempDir,
    }

    fn fixture(config_toml: &str) -> Fixture {
        let config: GuardianConfig = toml::from_str(config_toml).unwrap();
        let dir = TempDir::new().unwrap();
        let controller = Arc::new(RecordingController::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let table = Arc::new(ComponentTable::new());
        let recovery = Arc::new(
            RecoveryStore::open(
                &dir.path().join("recovery.db"),
                Arc::new(MemoryBackupStore::new()),
                RetentionPolicy::default(),
                Duration::from_millis(500),
            )
            .unwrap(),
        );
        let (handle, requests) = SchedulerHandle::channel(32);
        let controllers = Controllers {
            services: Arc::clone(&controller) as _,
            drivers: Arc::clone(&controller) as _,
            dcom: Arc::clone(&controller) as _,
            notifier: Arc::clone(&notifier) as _,
        };
        let engine = DecisionEngine::new(
            Arc::clone(&table),
            RetryLedger::new(RetryPolicy::default()),
            PolicyHandle::new(Policies::compile(&config).unwrap()),
            Arc::clone(&recovery),
            handle,
            controllers,
        );
        Fixture { engine, requests, controller, notifier, table, recovery, _dir: dir }
    }

    fn warning(component: ComponentId, message: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            timestamp: Utc::now(),
            source: "Service Control Manager".to_string(),
            event_id: 1001,
            severity: Severity::Warning,
            message: message.to_string(),
            component: Some(component),
            category: EventCategory::ServiceWarning,
        }
    }

    fn error(component: Option<ComponentId>, message: &str) -> ClassifiedEvent {
        ClassifiedEvent {
            timestamp: Utc::now(),
            source: "Service Control Manager".to_string(),
            event_id: 7009,
            severity: Severity::Error,
            message: message.to_string(),
            component,
            category: EventCategory::SystemError,
        }
    }

    #[tokio::test]
    async fn warning_repairs_in_place_and_clears_the_budget() {
        let mut f = fixture("");
        let spooler = ComponentId::service("Spooler");

        f.engine.handle_event(warning(spooler.clone(), "service hung")).await;

        assert_eq!(f.controller.calls(), vec!["restart Spooler"]);
        assert_eq!(f.table.status(&spooler), Some(ComponentStatus::Healthy));
        assert!(f.requests.try_recv().is_err());

        // Budget cleared on success: further warnings keep repairing.
        for _ in 0..5 {
            f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
        }
        assert_eq!(f.controller.calls_of("restart"), 6);
        assert!(f.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn exhausted_retries_escalate_to_isolation() {
        let mut f = fixture("");
        f.controller.fail_on("restart");
        let spooler = ComponentId::service("Spooler");

        for _ in 0..3 {
            f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
            assert_eq!(f.table.status(&spooler), Some(ComponentStatus::Degraded));
            assert!(f.requests.try_recv().is_err());
        }

        f.engine.handle_event(warning(spooler.clone(), "service hung")).await;

        let request = f.requests.try_recv().unwrap();
        assert_eq!(request.priority, IsolationPriority::Elevated);
        assert_eq!(request.action, IsolationAction::Isolate);
        assert_eq!(request.component, spooler);
        assert!(request.reason.contains("Max retries exceeded"));
        // Exactly three attempts hit the controller.
        assert_eq!(f.controller.calls_of("restart"), 3);
    }

    #[tokio::test]
    async fn repair_success_after_failures_resets_the_budget() {
        let mut f = fixture("");
        f.controller.fail_on("restart");
        let spooler = ComponentId::service("Spooler");

        for _ in 0..2 {
            f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
        }
        assert_eq!(f.table.status(&spooler), Some(ComponentStatus::Degraded));

        // The service comes back before the budget runs out.
        f.controller.clear_failures();
        f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
        assert_eq!(f.table.status(&spooler), Some(ComponentStatus::Healthy));

        // Fresh budget: three more warnings repair without escalating.
        for _ in 0..3 {
            f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
        }
        assert_eq!(f.controller.calls_of("restart"), 6);
        assert!(f.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn driver_warning_without_source_counts_as_failed_attempt() {
        let mut f = fixture("");
        let ghost = ComponentId::driver("ghost");

        f.engine.handle_event(warning(ghost.clone(), "driver flaky")).await;

        // No source in the driver map: the controller is never called.
        assert!(f.controller.calls().is_empty());
        assert_eq!(f.table.status(&ghost), Some(ComponentStatus::Degraded));
        assert_eq!(f.engine.stats().repairs_attempted, 1);
        assert_eq!(f.engine.stats().repairs_succeeded, 0);
    }

    #[tokio::test]
    async fn error_checkpoints_then_cascades() {
        let mut f = fixture(
            r#"
            [dependencies]
            "service:AppHost" = ["service:Worker", "driver:netkvm"]
            "#,
        );
        let apphost = ComponentId::service("AppHost");

        f.engine.handle_event(error(Some(apphost.clone()), "terminated unexpectedly")).await;

        assert_eq!(f.recovery.count(), 1);
        let point = &f.recovery.list()[0];
        assert!(point.description.contains("Pre-isolation"));

        let mut components = Vec::new();
        while let Ok(request) = f.requests.try_recv() {
            assert_eq!(request.priority, IsolationPriority::Critical);
            assert_eq!(request.action, IsolationAction::Isolate);
            assert!(request.reason.contains("Cascading error from service:AppHost"));
            components.push(request.component);
        }
        components.sort();
        let mut expected = vec![
            apphost,
            ComponentId::service("Worker"),
            ComponentId::driver("netkvm"),
        ];
        expected.sort();
        assert_eq!(components, expected);
    }

    #[tokio::test]
    async fn unattributed_error_takes_no_action() {
        let mut f = fixture("");

        f.engine.handle_event(error(None, "something vague")).await;

        assert_eq!(f.recovery.count(), 0);
        assert!(f.requests.try_recv().is_err());
        assert_eq!(f.engine.stats().unattributed, 1);
    }

    #[tokio::test]
    async fn isolated_components_are_left_alone() {
        let mut f = fixture("");
        let spooler = ComponentId::service("Spooler");
        f.table.set_status(&spooler, ComponentStatus::Isolated);

        f.engine.handle_event(warning(spooler.clone(), "service hung")).await;
        assert!(f.controller.calls().is_empty());

        f.engine.handle_event(error(Some(spooler.clone()), "boom")).await;
        // Checkpoint still happens, but the isolated origin is not
        // re-requested.
        assert_eq!(f.recovery.count(), 1);
        assert!(f.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_binary_notifies_checkpoints_and_isolates() {
        let mut f = fixture("");
        let apphost = ComponentId::service("AppHost");

        f.engine
            .handle_issue(RegistryIssue {
                kind: RegistryIssueKind::MissingBinary,
                component: apphost.clone(),
                path: "/bin/apphost".into(),
            })
            .await;

        assert_eq!(f.notifier.titled("Critical System Issue"), 1);
        assert_eq!(f.recovery.count(), 1);
        let request = f.requests.try_recv().unwrap();
        assert_eq!(request.priority, IsolationPriority::Critical);
        assert_eq!(request.action, IsolationAction::Isolate);
        assert_eq!(request.reason, "Missing binary: /bin/apphost");
    }

    #[tokio::test]
    async fn missing_driver_quarantines_then_requests_reinstall() {
        let mut f = fixture(
            r#"
            [drivers]
            netkvm = "/drivers/netkvm.inf"
            "#,
        );
        let netkvm = ComponentId::driver("netkvm");

        f.engine
            .handle_issue(RegistryIssue {
                kind: RegistryIssueKind::DriverMissing,
                component: netkvm.clone(),
                path: "/sys/drivers/netkvm.sys".into(),
            })
            .await;

        let notes = f.notifier.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, "Driver Corruption Detected");
        assert_eq!(notes[0].1, "Missing driver file: /sys/drivers/netkvm.sys");
        assert_eq!(f.controller.calls(), vec!["quarantine netkvm"]);
        assert_eq!(f.recovery.count(), 1);

        let request = f.requests.try_recv().unwrap();
        assert_eq!(request.action, IsolationAction::Reinstall);
        assert_eq!(request.component, netkvm);
        assert_eq!(request.reason, "Missing driver: /sys/drivers/netkvm.sys");
    }

    #[tokio::test]
    async fn failed_quarantine_schedules_nothing() {
        let mut f = fixture("");
        f.controller.fail_on("quarantine");
        let netkvm = ComponentId::driver("netkvm");

        f.engine
            .handle_issue(RegistryIssue {
                kind: RegistryIssueKind::DriverMissing,
                component: netkvm,
                path: "/sys/drivers/netkvm.sys".into(),
            })
            .await;

        // Notification and checkpoint precede the quarantine attempt.
        assert_eq!(f.notifier.titled("Driver Corruption Detected"), 1);
        assert_eq!(f.recovery.count(), 1);
        assert!(f.requests.try_recv().is_err());
    }
}
