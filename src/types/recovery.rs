//! Recovery points and external backup references.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::ComponentRecord;

/// Reference to an externally stored system-state backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "handle")]
pub enum BackupRef {
    /// Backup stored; the handle is opaque to the decision core.
    Stored(String),
    /// The backup collaborator failed or timed out. The point still exists
    /// but has no external pre-image to roll back.
    Failed,
}

impl BackupRef {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

/// One rollback point: the full component table at a moment in time plus
/// the external backup taken with it. Keyed by `timestamp` in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPoint {
    /// Milliseconds since the Unix epoch. Strictly increasing across points
    /// within one store, even when checkpoints land in the same millisecond.
    pub timestamp: u64,
    pub components: Vec<ComponentRecord>,
    pub backup: BackupRef,
    /// What triggered the checkpoint.
    pub description: String,
}

impl RecoveryPoint {
    /// Wall-clock time of the point, when the timestamp is representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}
