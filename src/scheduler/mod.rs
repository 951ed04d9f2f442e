//! Isolation scheduling.
//!
//! The decision engine submits [`IsolationRequest`]s through a cheap
//! cloneable handle; a single scheduler task owns the priority queue and
//! drains it through a bounded pool of action tasks. Ordering: lower
//! priority value first, then enqueue order within a tier (explicit
//! sequence numbers, not wall-clock). One `(component, action)` pair is
//! outstanding at a time, covering both queued and in-flight work.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterError, Controllers};
use crate::config::PolicyHandle;
use crate::table::ComponentTable;
use crate::types::{
    ComponentId, ComponentKind, ComponentStatus, IsolationAction, IsolationRequest,
};

// ============================================================================
// Priority Queue
// ============================================================================

/// Heap entry carrying the explicit enqueue sequence used for FIFO
/// tie-breaking inside a priority tier.
struct QueuedRequest {
    request: IsolationRequest,
    seq: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request.priority == other.request.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: BinaryHeap is a max-heap, we want the lowest
        // priority value first, earliest sequence within a tier.
        match other.request.priority.cmp(&self.request.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Enqueue rejection, handing the request back for logging.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("isolation queue full")]
    Full(IsolationRequest),
    #[error("outstanding request exists for {}", .0.component)]
    Duplicate(IsolationRequest),
}

/// Bounded priority queue with `(component, action)` dedup across queued
/// and in-flight requests.
pub struct IsolationQueue {
    heap: BinaryHeap<QueuedRequest>,
    outstanding: HashSet<(ComponentId, IsolationAction)>,
    capacity: usize,
    next_seq: u64,
}

impl IsolationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            outstanding: HashSet::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Queued (not yet popped) requests.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueue(&mut self, request: IsolationRequest) -> Result<(), EnqueueError> {
        let key = (request.component.clone(), request.action);
        if self.outstanding.contains(&key) {
            return Err(EnqueueError::Duplicate(request));
        }
        if self.heap.len() >= self.capacity {
            return Err(EnqueueError::Full(request));
        }
        self.outstanding.insert(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedRequest { request, seq });
        Ok(())
    }

    /// Pop the highest-priority, earliest-enqueued request. It stays
    /// outstanding for dedup purposes until [`complete`](Self::complete).
    pub fn pop(&mut self) -> Option<IsolationRequest> {
        self.heap.pop().map(|queued| queued.request)
    }

    /// Release the dedup slot once the request has been executed.
    pub fn complete(&mut self, component: &ComponentId, action: IsolationAction) {
        self.outstanding.remove(&(component.clone(), action));
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Performs the adapter calls for one request and settles component state.
pub struct IsolationExecutor {
    pub table: Arc<ComponentTable>,
    pub controllers: Controllers,
    pub policies: Arc<PolicyHandle>,
}

impl IsolationExecutor {
    /// Execute one request. Runs exactly once per dequeued request; the
    /// component's status is settled here whatever the adapters say.
    pub async fn execute(&self, request: &IsolationRequest) {
        match request.action {
            IsolationAction::Isolate => self.execute_isolate(request).await,
            IsolationAction::Reinstall => self.execute_reinstall(request).await,
        }
    }

    async fn execute_isolate(&self, request: &IsolationRequest) {
        let component = &request.component;
        warn!(component = %component, reason = %request.reason, "Isolating component");

        let result = match component.kind {
            ComponentKind::Service => self.isolate_service(&component.name).await,
            ComponentKind::Driver => self.controllers.drivers.remove(&component.name).await,
            ComponentKind::DcomClass => {
                self.controllers.dcom.deregister(&component.name).await
            }
        };

        if let Err(e) = result {
            // One-way action: the failure is logged and state still
            // advances. No automatic retry.
            warn!(component = %component, error = %e, "Isolation adapter call failed");
        }

        self.table.set_status(component, ComponentStatus::Isolated);
        self.controllers
            .notifier
            .notify("System Component Isolation", &format!("Component isolated: {component}"))
            .await;
    }

    async fn isolate_service(&self, name: &str) -> Result<(), AdapterError> {
        self.controllers.services.stop(name).await?;
        self.controllers.services.disable(name).await
    }

    async fn execute_reinstall(&self, request: &IsolationRequest) {
        let component = &request.component;
        info!(component = %component, reason = %request.reason, "Reinstalling component");

        let driver_source =
            self.policies.load().driver_map.get(&component.name).cloned();
        let result = self.controllers.repair(component, driver_source.as_deref()).await;

        match result {
            Ok(()) => {
                self.table.set_status(component, ComponentStatus::Healthy);
                info!(component = %component, "Component reinstalled");
            }
            Err(e) => {
                // The suspect artifact was already quarantined; a failed
                // reinstall leaves the component out of service.
                warn!(component = %component, error = %e, "Reinstall failed, isolating instead");
                self.table.set_status(component, ComponentStatus::Isolated);
                self.controllers
                    .notifier
                    .notify(
                        "System Component Isolation",
                        &format!("Component isolated: {component}"),
                    )
                    .await;
            }
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Handle used by the decision engine to submit isolation requests.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<IsolationRequest>,
}

impl SchedulerHandle {
    /// Detached handle + receiver pair, for driving a decision loop without
    /// a live scheduler.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<IsolationRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Non-blocking submit. A full channel drops the request with a
    /// warning; queue dedup and capacity apply on the scheduler side.
    pub fn submit(&self, request: IsolationRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(component = %request.component, "Isolation channel full, request dropped");
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                warn!(component = %request.component, "Isolation scheduler gone, request dropped");
            }
        }
    }
}

/// Counters reported when the scheduler exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerStats {
    pub received: u64,
    pub executed: u64,
    pub deduplicated: u64,
    pub rejected_full: u64,
}

/// Priority-draining scheduler. Owns the queue; executes requests through
/// a bounded pool of action tasks. On shutdown, begun actions run to
/// completion and queued-but-unstarted requests are dropped with a log.
pub struct IsolationScheduler {
    rx: mpsc::Receiver<IsolationRequest>,
    queue: IsolationQueue,
    executor: Arc<IsolationExecutor>,
    max_concurrent_actions: usize,
    cancel: CancellationToken,
    stats: SchedulerStats,
}

impl IsolationScheduler {
    pub fn new(
        executor: Arc<IsolationExecutor>,
        capacity: usize,
        max_concurrent_actions: usize,
        cancel: CancellationToken,
    ) -> (Self, SchedulerHandle) {
        let (handle, rx) = SchedulerHandle::channel(capacity);
        (
            Self {
                rx,
                queue: IsolationQueue::new(capacity),
                executor,
                max_concurrent_actions,
                cancel,
                stats: SchedulerStats::default(),
            },
            handle,
        )
    }

    pub async fn run(mut self) -> SchedulerStats {
        info!(
            capacity = self.queue.capacity(),
            workers = self.max_concurrent_actions,
            "Isolation scheduler starting"
        );
        let mut inflight: JoinSet<(ComponentId, IsolationAction)> = JoinSet::new();

        loop {
            // Launch as many queued actions as the pool allows.
            while inflight.len() < self.max_concurrent_actions {
                let Some(request) = self.queue.pop() else { break };
                let executor = Arc::clone(&self.executor);
                inflight.spawn(async move {
                    let key = (request.component.clone(), request.action);
                    executor.execute(&request).await;
                    key
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe = self.rx.recv() => match maybe {
                    Some(request) => self.accept(request),
                    None => break,
                },
                Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                    self.settle(done);
                }
            }
        }

        if !self.queue.is_empty() {
            warn!(pending = self.queue.len(), "Scheduler stopping with requests still queued");
        }
        // Begun actions always finish.
        while let Some(done) = inflight.join_next().await {
            self.settle(done);
        }

        info!(
            received = self.stats.received,
            executed = self.stats.executed,
            deduplicated = self.stats.deduplicated,
            "Isolation scheduler stopped"
        );
        self.stats
    }

    fn accept(&mut self, request: IsolationRequest) {
        self.stats.received += 1;
        debug!(
            component = %request.component,
            action = %request.action,
            priority = %request.priority,
            "Isolation request received"
        );
        match self.queue.enqueue(request) {
            Ok(()) => {}
            Err(EnqueueError::Duplicate(rejected)) => {
                self.stats.deduplicated += 1;
                info!(
                    component = %rejected.component,
                    action = %rejected.action,
                    reason = %rejected.reason,
                    "Duplicate isolation request dropped"
                );
            }
            Err(EnqueueError::Full(rejected)) => {
                self.stats.rejected_full += 1;
                warn!(
                    component = %rejected.component,
                    capacity = self.queue.capacity(),
                    "Isolation queue full, request dropped"
                );
            }
        }
    }

    fn settle(&mut self, done: Result<(ComponentId, IsolationAction), tokio::task::JoinError>) {
        match done {
            Ok((component, action)) => {
                self.stats.executed += 1;
                self.queue.complete(&component, action);
            }
            Err(e) => warn!(error = %e, "Isolation action task failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::sim::{RecordingController, RecordingNotifier};
    use crate::config::{GuardianConfig, Policies};
    use crate::types::IsolationPriority;

    fn isolate(priority: IsolationPriority, component: ComponentId) -> IsolationRequest {
        IsolationRequest::isolate(priority, component, "test".to_string())
    }

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut queue = IsolationQueue::new(16);
        queue.enqueue(isolate(IsolationPriority::Elevated, ComponentId::service("e1"))).unwrap();
        queue.enqueue(isolate(IsolationPriority::Critical, ComponentId::service("c1"))).unwrap();
        queue.enqueue(isolate(IsolationPriority::Elevated, ComponentId::service("e2"))).unwrap();
        queue.enqueue(isolate(IsolationPriority::Critical, ComponentId::service("c2"))).unwrap();

        let order: Vec<String> =
            std::iter::from_fn(|| queue.pop()).map(|r| r.component.name).collect();
        assert_eq!(order, vec!["c1", "c2", "e1", "e2"]);
    }

    #[test]
    fn queue_dedups_component_action_pairs() {
        let mut queue = IsolationQueue::new(16);
        let spooler = ComponentId::service("Spooler");

        queue.enqueue(isolate(IsolationPriority::Critical, spooler.clone())).unwrap();
        let rejected = queue.enqueue(isolate(IsolationPriority::Elevated, spooler.clone()));
        assert!(matches!(rejected, Err(EnqueueError::Duplicate(_))));

        // A different action on the same component is distinct work.
        queue
            .enqueue(IsolationRequest::reinstall(
                IsolationPriority::Critical,
                spooler.clone(),
                "test".to_string(),
            ))
            .unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn dedup_covers_in_flight_until_complete() {
        let mut queue = IsolationQueue::new(16);
        let spooler = ComponentId::service("Spooler");

        queue.enqueue(isolate(IsolationPriority::Critical, spooler.clone())).unwrap();
        let popped = queue.pop().unwrap();
        assert_eq!(popped.component, spooler);

        // Still outstanding while in flight.
        assert!(matches!(
            queue.enqueue(isolate(IsolationPriority::Critical, spooler.clone())),
            Err(EnqueueError::Duplicate(_))
        ));

        queue.complete(&spooler, IsolationAction::Isolate);
        queue.enqueue(isolate(IsolationPriority::Critical, spooler)).unwrap();
    }

    #[test]
    fn queue_rejects_when_full() {
        let mut queue = IsolationQueue::new(2);
        queue.enqueue(isolate(IsolationPriority::Critical, ComponentId::service("a"))).unwrap();
        queue.enqueue(isolate(IsolationPriority::Critical, ComponentId::service("b"))).unwrap();
        assert!(matches!(
            queue.enqueue(isolate(IsolationPriority::Critical, ComponentId::service("c"))),
            Err(EnqueueError::Full(_))
        ));
    }

    // ------------------------------------------------------------------
    // Actor tests
    // ------------------------------------------------------------------

    struct Fixture {
        controller: Arc<RecordingController>,
        notifier: Arc<RecordingNotifier>,
        table: Arc<ComponentTable>,
        executor: Arc<IsolationExecutor>,
    }

    fn fixture(config: &GuardianConfig) -> Fixture {
        let controller = Arc::new(RecordingController::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let table = Arc::new(ComponentTable::new());
        let controllers = Controllers {
            services: Arc::clone(&controller) as _,
            drivers: Arc::clone(&controller) as _,
            dcom: Arc::clone(&controller) as _,
            notifier: Arc::clone(&notifier) as _,
        };
        let executor = Arc::new(IsolationExecutor {
            table: Arc::clone(&table),
            controllers,
            policies: PolicyHandle::new(Policies::compile(config).unwrap()),
        });
        Fixture { controller, notifier, table, executor }
    }

    async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn scheduler_isolates_a_service() {
        let f = fixture(&GuardianConfig::default());
        let cancel = CancellationToken::new();
        let (scheduler, handle) = IsolationScheduler::new(Arc::clone(&f.executor), 16, 2, cancel.clone());
        let run = tokio::spawn(scheduler.run());

        let spooler = ComponentId::service("Spooler");
        handle.submit(isolate(IsolationPriority::Critical, spooler.clone()));

        let notifier = Arc::clone(&f.notifier);
        assert!(wait_until(Duration::from_secs(2), || notifier.titled("System Component Isolation") == 1).await);

        cancel.cancel();
        let stats = run.await.unwrap();
        assert_eq!(stats.executed, 1);
        assert_eq!(f.controller.calls(), vec!["stop Spooler", "disable Spooler"]);
        assert_eq!(f.table.status(&spooler), Some(ComponentStatus::Isolated));
    }

    #[tokio::test]
    async fn duplicate_requests_execute_once() {
        let f = fixture(&GuardianConfig::default());
        // Hold the first action in flight so the duplicate arrives while
        // its (component, action) slot is still outstanding.
        f.controller.set_delay(Duration::from_millis(150));
        let cancel = CancellationToken::new();
        let (scheduler, handle) = IsolationScheduler::new(Arc::clone(&f.executor), 16, 1, cancel.clone());
        let run = tokio::spawn(scheduler.run());

        let spooler = ComponentId::service("Spooler");
        handle.submit(isolate(IsolationPriority::Critical, spooler.clone()));
        handle.submit(isolate(IsolationPriority::Elevated, spooler.clone()));

        let notifier = Arc::clone(&f.notifier);
        assert!(wait_until(Duration::from_secs(3), || notifier.titled("System Component Isolation") >= 1).await);

        cancel.cancel();
        let stats = run.await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(f.controller.calls_of("stop"), 1);
    }

    #[tokio::test]
    async fn reinstall_success_marks_healthy() {
        let config: GuardianConfig = toml::from_str(
            r#"
            [drivers]
            netkvm = "/drivers/netkvm.inf"
            "#,
        )
        .unwrap();
        let f = fixture(&config);
        let cancel = CancellationToken::new();
        let (scheduler, handle) = IsolationScheduler::new(Arc::clone(&f.executor), 16, 2, cancel.clone());
        let run = tokio::spawn(scheduler.run());

        let netkvm = ComponentId::driver("netkvm");
        handle.submit(IsolationRequest::reinstall(
            IsolationPriority::Critical,
            netkvm.clone(),
            "missing driver".to_string(),
        ));

        let table = Arc::clone(&f.table);
        let target = netkvm.clone();
        assert!(
            wait_until(Duration::from_secs(2), move || {
                table.status(&target) == Some(ComponentStatus::Healthy)
            })
            .await
        );

        cancel.cancel();
        run.await.unwrap();
        assert_eq!(f.controller.calls(), vec!["reinstall netkvm from /drivers/netkvm.inf"]);
        // Successful reinstall is not an isolation; no alert.
        assert_eq!(f.notifier.titled("System Component Isolation"), 0);
    }

    #[tokio::test]
    async fn reinstall_failure_falls_back_to_isolated() {
        let config: GuardianConfig = toml::from_str(
            r#"
            [drivers]
            netkvm = "/drivers/netkvm.inf"
            "#,
        )
        .unwrap();
        let f = fixture(&config);
        f.controller.fail_on("reinstall");
        let cancel = CancellationToken::new();
        let (scheduler, handle) = IsolationScheduler::new(Arc::clone(&f.executor), 16, 2, cancel.clone());
        let run = tokio::spawn(scheduler.run());

        let netkvm = ComponentId::driver("netkvm");
        handle.submit(IsolationRequest::reinstall(
            IsolationPriority::Critical,
            netkvm.clone(),
            "missing driver".to_string(),
        ));

        let notifier = Arc::clone(&f.notifier);
        assert!(wait_until(Duration::from_secs(2), || notifier.titled("System Component Isolation") == 1).await);

        cancel.cancel();
        run.await.unwrap();
        assert_eq!(f.table.status(&netkvm), Some(ComponentStatus::Isolated));
    }
}
