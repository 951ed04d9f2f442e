//! Scripted and recording adapter doubles.
//!
//! Used by the test suites to drive the full loop set without a platform:
//! event batches and scan findings are scripted up front, action calls are
//! recorded for assertion, and any operation can be told to fail.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{
    AdapterError, BackupStore, DcomController, DriverController, EventSource, NotificationSink,
    RegistryInspector, ServiceController,
};
use crate::types::{RawEvent, RegistryIssue};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event source that yields pre-seeded batches, then empties.
pub struct ScriptedEventSource {
    batches: VecDeque<Vec<RawEvent>>,
}

impl ScriptedEventSource {
    pub fn new(batches: Vec<Vec<RawEvent>>) -> Self {
        Self { batches: batches.into() }
    }

    /// One batch containing all given events.
    pub fn single(events: Vec<RawEvent>) -> Self {
        Self::new(vec![events])
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn poll(&mut self) -> Result<Vec<RawEvent>, AdapterError> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    fn source_name(&self) -> &str {
        "scripted"
    }
}

/// Recording double for the three action controllers.
///
/// Calls are recorded as "op target" strings in invocation order. Failure
/// injection is per operation name ("restart", "quarantine", ...); an
/// optional per-call delay lets tests hold an action in flight.
#[derive(Default)]
pub struct RecordingController {
    calls: Mutex<Vec<String>>,
    fail_ops: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call of `op` fail.
    pub fn fail_on(&self, op: &str) {
        lock(&self.fail_ops).insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_ops).clear();
    }

    /// Sleep this long inside every future call.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        let prefix = format!("{op} ");
        lock(&self.calls).iter().filter(|call| call.starts_with(&prefix)).count()
    }

    async fn record(&self, op: &str, target: &str) -> Result<(), AdapterError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.fail_ops).contains(op) {
            return Err(AdapterError::Failed(format!("injected {op} failure for {target}")));
        }
        lock(&self.calls).push(format!("{op} {target}"));
        Ok(())
    }
}

#[async_trait]
impl ServiceController for RecordingController {
    async fn restart(&self, name: &str) -> Result<(), AdapterError> {
        self.record("restart", name).await
    }

    async fn stop(&self, name: &str) -> Result<(), AdapterError> {
        self.record("stop", name).await
    }

    async fn disable(&self, name: &str) -> Result<(), AdapterError> {
        self.record("disable", name).await
    }
}

#[async_trait]
impl DriverController for RecordingController {
    async fn reinstall(&self, name: &str, source: &Path) -> Result<(), AdapterError> {
        self.record("reinstall", &format!("{} from {}", name, source.display())).await
    }

    async fn remove(&self, name: &str) -> Result<(), AdapterError> {
        self.record("remove", name).await
    }

    async fn quarantine(&self, name: &str) -> Result<PathBuf, AdapterError> {
        self.record("quarantine", name).await?;
        Ok(PathBuf::from(format!("/quarantine/{name}")))
    }
}

#[async_trait]
impl DcomController for RecordingController {
    async fn reregister(&self, clsid: &str) -> Result<(), AdapterError> {
        self.record("reregister", clsid).await
    }

    async fn deregister(&self, clsid: &str) -> Result<(), AdapterError> {
        self.record("deregister", clsid).await
    }
}

/// In-memory backup store with failure injection.
#[derive(Default)]
pub struct MemoryBackupStore {
    snapshots: Mutex<HashMap<String, String>>,
    deleted: Mutex<Vec<String>>,
    fail_snapshot: Mutex<bool>,
    fail_restore: Mutex<bool>,
    snapshot_delay: Mutex<Option<Duration>>,
    seq: AtomicU64,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_snapshot(&self, fail: bool) {
        *lock(&self.fail_snapshot) = fail;
    }

    /// Sleep this long inside every future snapshot call.
    pub fn set_snapshot_delay(&self, delay: Duration) {
        *lock(&self.snapshot_delay) = Some(delay);
    }

    pub fn set_fail_restore(&self, fail: bool) {
        *lock(&self.fail_restore) = fail;
    }

    pub fn stored_count(&self) -> usize {
        lock(&self.snapshots).len()
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn snapshot(&self, scope: &str) -> Result<String, AdapterError> {
        let delay = *lock(&self.snapshot_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.fail_snapshot) {
            return Err(AdapterError::Failed("injected snapshot failure".to_string()));
        }
        let handle = format!("mem-{:04}", self.seq.fetch_add(1, Ordering::Relaxed));
        lock(&self.snapshots).insert(handle.clone(), scope.to_string());
        Ok(handle)
    }

    async fn restore(&self, handle: &str) -> Result<(), AdapterError> {
        if *lock(&self.fail_restore) {
            return Err(AdapterError::Failed("injected restore failure".to_string()));
        }
        if lock(&self.snapshots).contains_key(handle) {
            Ok(())
        } else {
            Err(AdapterError::Failed(format!("unknown backup handle {handle}")))
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), AdapterError> {
        lock(&self.snapshots).remove(handle);
        lock(&self.deleted).push(handle.to_string());
        Ok(())
    }
}

/// Notification sink that records `(title, message)` pairs.
#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        lock(&self.notes).clone()
    }

    pub fn titled(&self, title: &str) -> usize {
        lock(&self.notes).iter().filter(|(t, _)| t == title).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) {
        lock(&self.notes).push((title.to_string(), message.to_string()));
    }
}

/// Registry inspector that emits each scripted issue exactly once.
#[derive(Default)]
pub struct ScriptedInspector {
    service_issues: Mutex<Vec<RegistryIssue>>,
    driver_issues: Mutex<Vec<RegistryIssue>>,
}

impl ScriptedInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_service_issue(&self, issue: RegistryIssue) {
        lock(&self.service_issues).push(issue);
    }

    pub fn push_driver_issue(&self, issue: RegistryIssue) {
        lock(&self.driver_issues).push(issue);
    }
}

#[async_trait]
impl RegistryInspector for ScriptedInspector {
    async fn scan_services(&self) -> Result<Vec<RegistryIssue>, AdapterError> {
        Ok(std::mem::take(&mut *lock(&self.service_issues)))
    }

    async fn scan_drivers(&self) -> Result<Vec<RegistryIssue>, AdapterError> {
        Ok(std::mem::take(&mut *lock(&self.driver_issues)))
    }
}
