//! Guardian configuration structures and loading.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::{ComponentId, ComponentKind};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config i/o error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
    #[error("invalid component id '{0}' (expected kind:name)")]
    ComponentId(String),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

// ============================================================================
// Sections
// ============================================================================

/// Which sources and event ids count as warnings vs errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_warning_sources")]
    pub warning_sources: Vec<String>,
    #[serde(default = "default_warning_ids")]
    pub warning_ids: Vec<u32>,
    #[serde(default = "default_error_sources")]
    pub error_sources: Vec<String>,
    #[serde(default = "default_error_ids")]
    pub error_ids: Vec<u32>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            warning_sources: default_warning_sources(),
            warning_ids: default_warning_ids(),
            error_sources: default_error_sources(),
            error_ids: default_error_ids(),
        }
    }
}

fn default_warning_sources() -> Vec<String> {
    defaults::WARNING_SOURCES.iter().map(ToString::to_string).collect()
}
fn default_warning_ids() -> Vec<u32> {
    defaults::WARNING_EVENT_IDS.to_vec()
}
fn default_error_sources() -> Vec<String> {
    defaults::ERROR_SOURCES.iter().map(ToString::to_string).collect()
}
fn default_error_ids() -> Vec<u32> {
    defaults::ERROR_EVENT_IDS.to_vec()
}

/// One tracked component seeded into the table at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub kind: ComponentKind,
    pub name: String,
    /// Artifact path the inventory scan checks for existence.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Expected content hash, when the operator pins one.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl InventoryEntry {
    pub fn component_id(&self) -> ComponentId {
        ComponentId::new(self.kind, &self.name)
    }
}

/// Repair retry budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_window_secs")]
    pub window_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_retry_max_attempts(), window_secs: default_retry_window_secs() }
    }
}

fn default_retry_max_attempts() -> u32 {
    defaults::RETRY_MAX_ATTEMPTS
}
fn default_retry_window_secs() -> u64 {
    defaults::RETRY_WINDOW_SECS
}

/// Channel and queue capacities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_raw_event_queue")]
    pub raw_events: usize,
    #[serde(default = "default_issue_queue")]
    pub issues: usize,
    #[serde(default = "default_isolation_queue")]
    pub isolation: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            raw_events: default_raw_event_queue(),
            issues: default_issue_queue(),
            isolation: default_isolation_queue(),
        }
    }
}

fn default_raw_event_queue() -> usize {
    defaults::RAW_EVENT_QUEUE_CAPACITY
}
fn default_issue_queue() -> usize {
    defaults::ISSUE_QUEUE_CAPACITY
}
fn default_isolation_queue() -> usize {
    defaults::ISOLATION_QUEUE_CAPACITY
}

/// Recovery point retention and storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_retention")]
    pub retention: usize,
    #[serde(default = "default_recovery_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_backup_timeout_ms")]
    pub backup_timeout_ms: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retention: default_recovery_retention(),
            max_age_days: default_recovery_max_age_days(),
            backup_timeout_ms: default_backup_timeout_ms(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_recovery_retention() -> usize {
    defaults::RECOVERY_RETENTION
}
fn default_recovery_max_age_days() -> i64 {
    defaults::RECOVERY_MAX_AGE_DAYS
}
fn default_backup_timeout_ms() -> u64 {
    defaults::BACKUP_TIMEOUT_MS
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

/// Loop cadences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_event_poll_secs")]
    pub event_poll_secs: u64,
    #[serde(default = "default_event_error_backoff_secs")]
    pub event_error_backoff_secs: u64,
    #[serde(default = "default_inventory_scan_secs")]
    pub inventory_scan_secs: u64,
    #[serde(default = "default_policy_watch_secs")]
    pub policy_watch_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            event_poll_secs: default_event_poll_secs(),
            event_error_backoff_secs: default_event_error_backoff_secs(),
            inventory_scan_secs: default_inventory_scan_secs(),
            policy_watch_secs: default_policy_watch_secs(),
        }
    }
}

fn default_event_poll_secs() -> u64 {
    defaults::EVENT_POLL_SECS
}
fn default_event_error_backoff_secs() -> u64 {
    defaults::EVENT_ERROR_BACKOFF_SECS
}
fn default_inventory_scan_secs() -> u64 {
    defaults::INVENTORY_SCAN_SECS
}
fn default_policy_watch_secs() -> u64 {
    defaults::POLICY_WATCH_SECS
}

/// Action worker pool bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent_actions: default_max_concurrent_actions() }
    }
}

fn default_max_concurrent_actions() -> usize {
    defaults::MAX_CONCURRENT_ACTIONS
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration for a guardian deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default)]
    pub events: EventsConfig,
    /// Failure-impact edges: the key component's failure cascades to the
    /// listed components. Both sides are composite ids ("service:Spooler").
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,
    /// Driver name -> reinstall source artifact.
    #[serde(default)]
    pub drivers: HashMap<String, PathBuf>,
    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

impl GuardianConfig {
    /// Load using the standard search order, reporting which file (if any)
    /// the config came from so the watcher can follow it.
    ///
    /// An explicit path that fails to load is an error; fallback paths
    /// degrade to defaults with a warning.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded guardian config");
            return Ok((config, Some(path.to_path_buf())));
        }

        if let Ok(env_path) = std::env::var("VIGIL_CONFIG") {
            let path = PathBuf::from(&env_path);
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded guardian config from VIGIL_CONFIG");
                    return Ok((config, Some(path)));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "VIGIL_CONFIG unusable, falling back");
                }
            }
        }

        let local = PathBuf::from("vigil.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded guardian config from ./vigil.toml");
                    return Ok((config, Some(local)));
                }
                Err(e) => {
                    warn!(error = %e, "./vigil.toml unusable, falling back");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Ok((Self::default(), None))
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check tunables for internal consistency, collecting every problem
    /// rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.window_secs == 0 {
            errors.push("retry.window_secs must be positive".to_string());
        }
        if self.queues.raw_events == 0 {
            errors.push("queues.raw_events must be positive".to_string());
        }
        if self.queues.issues == 0 {
            errors.push("queues.issues must be positive".to_string());
        }
        if self.queues.isolation == 0 {
            errors.push("queues.isolation must be positive".to_string());
        }
        if self.recovery.retention == 0 {
            errors.push("recovery.retention must be at least 1".to_string());
        }
        if self.recovery.max_age_days <= 0 {
            errors.push("recovery.max_age_days must be positive".to_string());
        }
        if self.workers.max_concurrent_actions == 0 {
            errors.push("workers.max_concurrent_actions must be at least 1".to_string());
        }
        if self.scan.event_poll_secs == 0 {
            errors.push("scan.event_poll_secs must be positive".to_string());
        }
        if self.scan.inventory_scan_secs == 0 {
            errors.push("scan.inventory_scan_secs must be positive".to_string());
        }
        for entry in &self.inventory {
            if entry.name.trim().is_empty() {
                errors.push("inventory entries must have a non-empty name".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
