//! Append-only recovery point log on sled.
//!
//! Keys are big-endian millisecond timestamps, so the tree iterates in
//! chronological order and newest-first scans are just `.rev()`. Values are
//! JSON-encoded [`RecoveryPoint`]s. Writers (checkpoint, prune) serialize
//! behind one async mutex; reads go straight to the tree.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::BackupStore;
use crate::table::ComponentTable;
use crate::types::{BackupRef, ComponentRecord, RecoveryPoint};

/// Recovery store errors.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no recovery point at timestamp {0}")]
    NotFound(u64),
    #[error("backup restore failed: {0}")]
    Backup(String),
}

/// Retention rules applied by `prune`.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Keep at most this many newest points.
    pub keep: usize,
    /// Drop points older than this many days regardless of count.
    pub max_age_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep: 5, max_age_days: 7 }
    }
}

/// Store-level statistics for startup logging.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub point_count: usize,
    pub size_bytes: u64,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
}

pub struct RecoveryStore {
    db: sled::Db,
    backup: Arc<dyn BackupStore>,
    retention: RetentionPolicy,
    /// Bound on how long a checkpoint waits for the backup collaborator.
    backup_timeout: Duration,
    /// High-water mark keeping point timestamps strictly increasing, seeded
    /// from the newest stored key so restarts survive clock skew.
    last_timestamp: AtomicU64,
    write_guard: Mutex<()>,
}

fn decode_key(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    if key.len() == 8 {
        bytes.copy_from_slice(key);
    }
    u64::from_be_bytes(bytes)
}

impl RecoveryStore {
    pub fn open(
        path: &Path,
        backup: Arc<dyn BackupStore>,
        retention: RetentionPolicy,
        backup_timeout: Duration,
    ) -> Result<Self, RecoveryError> {
        let db = sled::open(path)?;
        let last = db.last()?.map_or(0, |(key, _)| decode_key(&key));
        info!(path = %path.display(), points = db.len(), "Recovery store opened");
        Ok(Self {
            db,
            backup,
            retention,
            backup_timeout,
            last_timestamp: AtomicU64::new(last),
            write_guard: Mutex::new(()),
        })
    }

    // Called with the write guard held.
    fn next_timestamp(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let last = self.last_timestamp.load(Ordering::Acquire);
        let timestamp = now.max(last + 1);
        self.last_timestamp.store(timestamp, Ordering::Release);
        timestamp
    }

    fn put(&self, point: &RecoveryPoint) -> Result<(), RecoveryError> {
        let value = serde_json::to_vec(point)?;
        self.db.insert(point.timestamp.to_be_bytes(), value)?;
        Ok(())
    }

    /// Append a recovery point for the given component snapshot.
    ///
    /// The external backup call is bounded by the configured timeout; on
    /// failure or timeout the point is recorded with [`BackupRef::Failed`]
    /// so the triggering action can proceed.
    pub async fn checkpoint(
        &self,
        components: Vec<ComponentRecord>,
        description: &str,
    ) -> Result<u64, RecoveryError> {
        let _guard = self.write_guard.lock().await;
        let timestamp = self.next_timestamp();

        let backup = match tokio::time::timeout(
            self.backup_timeout,
            self.backup.snapshot(description),
        )
        .await
        {
            Ok(Ok(handle)) => BackupRef::Stored(handle),
            Ok(Err(e)) => {
                warn!(error = %e, "External backup failed, recording checkpoint without one");
                BackupRef::Failed
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.backup_timeout.as_millis() as u64,
                    "External backup timed out, recording checkpoint without one"
                );
                BackupRef::Failed
            }
        };

        let point = RecoveryPoint {
            timestamp,
            components,
            backup,
            description: description.to_string(),
        };
        self.put(&point)?;

        info!(
            timestamp,
            components = point.components.len(),
            description = %point.description,
            "Recovery point recorded"
        );
        Ok(timestamp)
    }

    /// Fetch the point stored at exactly `timestamp`.
    pub fn get(&self, timestamp: u64) -> Result<RecoveryPoint, RecoveryError> {
        match self.db.get(timestamp.to_be_bytes())? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Err(RecoveryError::NotFound(timestamp)),
        }
    }

    /// Roll the component table back to the point at `timestamp`.
    ///
    /// External state is restored first; the in-memory table only changes
    /// once the collaborator succeeds, so a failed restore leaves the
    /// current state untouched.
    pub async fn restore(
        &self,
        timestamp: u64,
        table: &ComponentTable,
    ) -> Result<RecoveryPoint, RecoveryError> {
        let point = self.get(timestamp)?;

        match &point.backup {
            BackupRef::Stored(handle) => {
                self.backup
                    .restore(handle)
                    .await
                    .map_err(|e| RecoveryError::Backup(e.to_string()))?;
            }
            BackupRef::Failed => {
                warn!(timestamp, "Point has no external backup, restoring component table only");
            }
        }

        table.replace_all(point.components.clone());
        info!(timestamp, components = point.components.len(), "Component table restored");
        Ok(point)
    }

    /// Enforce retention: keep the newest `keep` points and drop anything
    /// older than the age cutoff. Removed points get their external backup
    /// handles deleted through the collaborator; a failed delete is logged
    /// and the point is dropped anyway.
    pub async fn prune(&self) -> Result<usize, RecoveryError> {
        let _guard = self.write_guard.lock().await;

        let cutoff = Utc::now() - chrono::Duration::days(self.retention.max_age_days);
        let cutoff_ms = u64::try_from(cutoff.timestamp_millis()).unwrap_or(0);

        let mut expired: Vec<(u64, BackupRef)> = Vec::new();
        for (index, item) in self.db.iter().rev().enumerate() {
            let (key, value) = item?;
            let timestamp = decode_key(&key);
            if index >= self.retention.keep || timestamp < cutoff_ms {
                let backup = match serde_json::from_slice::<RecoveryPoint>(&value) {
                    Ok(point) => point.backup,
                    Err(e) => {
                        warn!(timestamp, error = %e, "Unreadable recovery point scheduled for removal");
                        BackupRef::Failed
                    }
                };
                expired.push((timestamp, backup));
            }
        }

        for (timestamp, backup) in &expired {
            self.db.remove(timestamp.to_be_bytes())?;
            if let BackupRef::Stored(handle) = backup {
                if let Err(e) = self.backup.delete(handle).await {
                    warn!(timestamp, handle = %handle, error = %e, "External backup delete failed");
                }
            }
        }

        if !expired.is_empty() {
            self.db.flush()?;
            info!(removed = expired.len(), kept = self.db.len(), "Recovery points pruned");
        } else {
            debug!(points = self.db.len(), "Prune pass found nothing to remove");
        }
        Ok(expired.len())
    }

    /// All stored points, newest first. Unreadable entries are skipped.
    pub fn list(&self) -> Vec<RecoveryPoint> {
        let mut points = Vec::new();
        for item in self.db.iter().rev() {
            match item {
                Ok((_key, value)) => match serde_json::from_slice(&value) {
                    Ok(point) => points.push(point),
                    Err(e) => warn!(error = %e, "Skipping unreadable recovery point"),
                },
                Err(e) => warn!(error = %e, "Recovery store iteration error"),
            }
        }
        points
    }

    pub fn count(&self) -> usize {
        self.db.len()
    }

    pub fn flush(&self) -> Result<(), RecoveryError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let oldest = self.db.first().ok().flatten().map(|(key, _)| decode_key(&key));
        let newest = self.db.last().ok().flatten().map(|(key, _)| decode_key(&key));
        StoreStats {
            point_count: self.db.len(),
            size_bytes: self.db.size_on_disk().unwrap_or(0),
            oldest_timestamp: oldest,
            newest_timestamp: newest,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
