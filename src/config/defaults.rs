//! Built-in policy constants.
//!
//! These mirror the stock configuration shipped with the daemon; every one
//! can be overridden from the TOML file. Grouped by subsystem.

// ============================================================================
// Event Patterns
// ============================================================================

/// Event sources treated as warnings when the config does not override them.
pub const WARNING_SOURCES: &[&str] = &["Service Control Manager", "Disk", "Netwtw14"];

/// Event ids treated as warnings.
pub const WARNING_EVENT_IDS: &[u32] = &[1001, 6062, 219];

/// Event sources treated as errors.
pub const ERROR_SOURCES: &[&str] = &["DCOM", "DriverFrameworks-UserMode", "Service Control Manager"];

/// Event ids treated as errors.
pub const ERROR_EVENT_IDS: &[u32] = &[10005, 10010, 7000, 7009];

// ============================================================================
// Loop Cadence
// ============================================================================

/// Seconds between event source polls when the feed is idle.
pub const EVENT_POLL_SECS: u64 = 5;

/// Seconds to back off after an event source error.
pub const EVENT_ERROR_BACKOFF_SECS: u64 = 10;

/// Seconds between inventory scans.
pub const INVENTORY_SCAN_SECS: u64 = 30;

/// Seconds between config file change checks.
pub const POLICY_WATCH_SECS: u64 = 30;

// ============================================================================
// Retry Budget
// ============================================================================

/// In-place repair attempts per component inside one window.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Rolling retry window (seconds). One hour.
pub const RETRY_WINDOW_SECS: u64 = 3_600;

// ============================================================================
// Queues & Workers
// ============================================================================

/// Raw event queue capacity (ingest -> decision).
pub const RAW_EVENT_QUEUE_CAPACITY: usize = 256;

/// Registry issue queue capacity (inventory -> decision).
pub const ISSUE_QUEUE_CAPACITY: usize = 64;

/// Isolation queue capacity (decision -> scheduler).
pub const ISOLATION_QUEUE_CAPACITY: usize = 64;

/// Concurrent isolation/reinstall action bound.
pub const MAX_CONCURRENT_ACTIONS: usize = 4;

// ============================================================================
// Recovery
// ============================================================================

/// Recovery points kept by prune.
pub const RECOVERY_RETENTION: usize = 5;

/// Recovery point maximum age (days).
pub const RECOVERY_MAX_AGE_DAYS: i64 = 7;

/// Bound on the external backup call during a checkpoint (milliseconds).
pub const BACKUP_TIMEOUT_MS: u64 = 2_000;

/// Default data directory for the recovery log and file backups.
pub const DATA_DIR: &str = "./data";
