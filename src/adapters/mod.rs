//! Collaborator contracts for the platform-facing edges of the daemon.
//!
//! The decision core never touches the OS directly. Everything I/O-shaped
//! arrives through these narrow traits: event feeds, registry scans, the
//! three action controllers, external backups, and user notification. The
//! `local` module holds the implementations the shipped binary wires up;
//! `sim` holds scripted and recording doubles for tests.

pub mod local;
pub mod sim;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{ComponentId, ComponentKind, RawEvent, RegistryIssue};

/// Error from a collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Source of raw platform events.
///
/// Owned by the ingest loop; implementations may keep read position or
/// buffers between polls.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Poll for the next batch of events. An empty batch means nothing new
    /// was available; the ingest loop applies its own pacing.
    async fn poll(&mut self) -> Result<Vec<RawEvent>, AdapterError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Inspector for service/driver registry consistency.
#[async_trait]
pub trait RegistryInspector: Send + Sync + 'static {
    /// Services whose registered binary is missing from the filesystem.
    async fn scan_services(&self) -> Result<Vec<RegistryIssue>, AdapterError>;

    /// Drivers whose file is missing from its expected location.
    async fn scan_drivers(&self) -> Result<Vec<RegistryIssue>, AdapterError>;
}

/// Service control operations.
#[async_trait]
pub trait ServiceController: Send + Sync + 'static {
    async fn restart(&self, name: &str) -> Result<(), AdapterError>;
    async fn stop(&self, name: &str) -> Result<(), AdapterError>;
    async fn disable(&self, name: &str) -> Result<(), AdapterError>;
}

/// Driver store operations.
#[async_trait]
pub trait DriverController: Send + Sync + 'static {
    /// Install the driver from a known-good source artifact.
    async fn reinstall(&self, name: &str, source: &Path) -> Result<(), AdapterError>;

    /// Remove the driver from the active store.
    async fn remove(&self, name: &str) -> Result<(), AdapterError>;

    /// Move a suspect driver artifact out of the load path, returning where
    /// it went.
    async fn quarantine(&self, name: &str) -> Result<PathBuf, AdapterError>;
}

/// DCOM registration operations.
#[async_trait]
pub trait DcomController: Send + Sync + 'static {
    async fn reregister(&self, clsid: &str) -> Result<(), AdapterError>;
    async fn deregister(&self, clsid: &str) -> Result<(), AdapterError>;
}

/// External system-state backup collaborator.
#[async_trait]
pub trait BackupStore: Send + Sync + 'static {
    /// Store a backup for the given scope, returning an opaque handle.
    async fn snapshot(&self, scope: &str) -> Result<String, AdapterError>;

    /// Roll external state back to a previously stored handle.
    async fn restore(&self, handle: &str) -> Result<(), AdapterError>;

    /// Discard a stored backup. Idempotent.
    async fn delete(&self, handle: &str) -> Result<(), AdapterError>;
}

/// Best-effort user notification sink. Failures are the implementation's
/// to log; callers never see them.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, title: &str, message: &str);
}

/// The action-side collaborators shared by the repair and isolation paths.
#[derive(Clone)]
pub struct Controllers {
    pub services: Arc<dyn ServiceController>,
    pub drivers: Arc<dyn DriverController>,
    pub dcom: Arc<dyn DcomController>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Controllers {
    /// Kind-dispatched in-place repair: restart the service, reinstall the
    /// driver from its source, or re-register the DCOM class. A driver with
    /// no known source fails without touching the controller.
    pub async fn repair(
        &self,
        component: &ComponentId,
        driver_source: Option<&Path>,
    ) -> Result<(), AdapterError> {
        match component.kind {
            ComponentKind::Service => self.services.restart(&component.name).await,
            ComponentKind::Driver => match driver_source {
                Some(source) => self.drivers.reinstall(&component.name, source).await,
                None => Err(AdapterError::Failed(format!(
                    "no reinstall source for driver {}",
                    component.name
                ))),
            },
            ComponentKind::DcomClass => self.dcom.reregister(&component.name).await,
        }
    }
}
