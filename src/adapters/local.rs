//! Local adapter implementations wired up by the shipped binary.
//!
//! Event feeds read JSON lines from a file (tail semantics) or stdin. The
//! inventory inspector checks configured artifact paths against the local
//! filesystem. Backups are flat JSON files under the data directory. The
//! action controllers are dry-run: they log what a platform port would do
//! and succeed, which keeps the daemon observable end to end on a dev box.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, info, warn};

use super::{
    AdapterError, BackupStore, DcomController, DriverController, EventSource, NotificationSink,
    RegistryInspector, ServiceController,
};
use crate::config::InventoryEntry;
use crate::types::{ComponentId, ComponentKind, RawEvent, RegistryIssue, RegistryIssueKind};

// ============================================================================
// Event Sources
// ============================================================================

/// JSON-lines event feed with tail semantics: each poll drains whatever
/// complete lines have been appended since the last one.
pub struct JsonlEventSource {
    reader: BufReader<fs::File>,
    line: String,
    name: String,
}

impl JsonlEventSource {
    pub async fn open(path: &Path) -> Result<Self, AdapterError> {
        let file = fs::File::open(path).await?;
        Ok(Self {
            reader: BufReader::new(file),
            line: String::new(),
            name: format!("jsonl:{}", path.display()),
        })
    }
}

#[async_trait]
impl EventSource for JsonlEventSource {
    async fn poll(&mut self) -> Result<Vec<RawEvent>, AdapterError> {
        let mut events = Vec::new();
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line).await?;
            if bytes == 0 {
                break;
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "Skipping malformed event line"),
            }
        }
        Ok(events)
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

/// Stdin event feed, one JSON event per line. Yields one event per poll so
/// a slow upstream never stalls a batch.
pub struct StdinEventSource {
    reader: BufReader<Stdin>,
    line: String,
    eof: bool,
}

impl StdinEventSource {
    pub fn new() -> Self {
        Self { reader: BufReader::new(tokio::io::stdin()), line: String::new(), eof: false }
    }
}

impl Default for StdinEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for StdinEventSource {
    async fn poll(&mut self) -> Result<Vec<RawEvent>, AdapterError> {
        if self.eof {
            return Ok(Vec::new());
        }
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line).await?;
            if bytes == 0 {
                self.eof = true;
                info!("Stdin event feed closed");
                return Ok(Vec::new());
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(event) => return Ok(vec![event]),
                Err(e) => warn!(error = %e, "Skipping malformed event line"),
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

/// No-op feed for inventory-only deployments.
pub struct IdleEventSource;

#[async_trait]
impl EventSource for IdleEventSource {
    async fn poll(&mut self) -> Result<Vec<RawEvent>, AdapterError> {
        Ok(Vec::new())
    }

    fn source_name(&self) -> &str {
        "idle"
    }
}

// ============================================================================
// Inventory Inspector
// ============================================================================

/// Checks configured artifact paths against the local filesystem.
pub struct ManifestInspector {
    services: Vec<(ComponentId, PathBuf)>,
    drivers: Vec<(ComponentId, PathBuf)>,
}

impl ManifestInspector {
    /// Build from the inventory section. Entries without a path have
    /// nothing checkable and are skipped.
    pub fn from_inventory(entries: &[InventoryEntry]) -> Self {
        let mut services = Vec::new();
        let mut drivers = Vec::new();
        for entry in entries {
            let Some(path) = entry.path.clone() else { continue };
            match entry.kind {
                ComponentKind::Service => services.push((entry.component_id(), path)),
                ComponentKind::Driver => drivers.push((entry.component_id(), path)),
                ComponentKind::DcomClass => {}
            }
        }
        Self { services, drivers }
    }

    async fn missing(
        entries: &[(ComponentId, PathBuf)],
        kind: RegistryIssueKind,
    ) -> Vec<RegistryIssue> {
        let mut issues = Vec::new();
        for (component, path) in entries {
            match fs::try_exists(path).await {
                Ok(true) => {}
                Ok(false) => issues.push(RegistryIssue {
                    kind,
                    component: component.clone(),
                    path: path.clone(),
                }),
                Err(e) => {
                    // Unreadable is not the same as missing; skip rather
                    // than trigger isolation on a permissions hiccup.
                    debug!(component = %component, error = %e, "Inventory path unreadable");
                }
            }
        }
        issues
    }
}

#[async_trait]
impl RegistryInspector for ManifestInspector {
    async fn scan_services(&self) -> Result<Vec<RegistryIssue>, AdapterError> {
        Ok(Self::missing(&self.services, RegistryIssueKind::MissingBinary).await)
    }

    async fn scan_drivers(&self) -> Result<Vec<RegistryIssue>, AdapterError> {
        Ok(Self::missing(&self.drivers, RegistryIssueKind::DriverMissing).await)
    }
}

// ============================================================================
// Backup Store
// ============================================================================

/// Flat-file backup store under the data directory. Each snapshot is one
/// JSON file; the handle is the file name.
pub struct FsBackupStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FsBackupStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AdapterError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir, seq: AtomicU64::new(0) })
    }
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn snapshot(&self, scope: &str) -> Result<String, AdapterError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let handle = format!("backup-{}-{:04}.json", Utc::now().timestamp_millis(), seq);
        let payload = serde_json::json!({
            "scope": scope,
            "created_at": Utc::now().to_rfc3339(),
        });
        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;
        fs::write(self.dir.join(&handle), bytes).await?;
        debug!(handle = %handle, "Backup snapshot written");
        Ok(handle)
    }

    async fn restore(&self, handle: &str) -> Result<(), AdapterError> {
        let path = self.dir.join(handle);
        if fs::try_exists(&path).await? {
            info!(handle = %handle, "Backup artifact verified for restore");
            Ok(())
        } else {
            Err(AdapterError::Failed(format!("backup artifact {handle} missing")))
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), AdapterError> {
        match fs::remove_file(self.dir.join(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Notification sink that routes alerts to the log stream.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, title: &str, message: &str) {
        warn!("🔔 {}: {}", title, message);
    }
}

// ============================================================================
// Dry-Run Controllers
// ============================================================================

/// Logs service control calls and succeeds.
pub struct DryRunServiceController;

#[async_trait]
impl ServiceController for DryRunServiceController {
    async fn restart(&self, name: &str) -> Result<(), AdapterError> {
        info!(service = %name, "[dry-run] restart service");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), AdapterError> {
        info!(service = %name, "[dry-run] stop service");
        Ok(())
    }

    async fn disable(&self, name: &str) -> Result<(), AdapterError> {
        info!(service = %name, "[dry-run] disable service");
        Ok(())
    }
}

/// Logs driver store calls and succeeds. Quarantine reports a path under
/// the configured quarantine directory without moving anything.
pub struct DryRunDriverController {
    quarantine_dir: PathBuf,
}

impl DryRunDriverController {
    pub fn new(quarantine_dir: impl Into<PathBuf>) -> Self {
        Self { quarantine_dir: quarantine_dir.into() }
    }
}

#[async_trait]
impl DriverController for DryRunDriverController {
    async fn reinstall(&self, name: &str, source: &Path) -> Result<(), AdapterError> {
        info!(driver = %name, source = %source.display(), "[dry-run] reinstall driver");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), AdapterError> {
        info!(driver = %name, "[dry-run] remove driver");
        Ok(())
    }

    async fn quarantine(&self, name: &str) -> Result<PathBuf, AdapterError> {
        let target = self.quarantine_dir.join(name);
        info!(driver = %name, target = %target.display(), "[dry-run] quarantine driver");
        Ok(target)
    }
}

/// Logs DCOM registration calls and succeeds.
pub struct DryRunDcomController;

#[async_trait]
impl DcomController for DryRunDcomController {
    async fn reregister(&self, clsid: &str) -> Result<(), AdapterError> {
        info!(clsid = %clsid, "[dry-run] re-register DCOM class");
        Ok(())
    }

    async fn deregister(&self, clsid: &str) -> Result<(), AdapterError> {
        info!(clsid = %clsid, "[dry-run] deregister DCOM class");
        Ok(())
    }
}
