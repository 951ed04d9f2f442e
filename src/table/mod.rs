//! Component table: the shared registry of tracked components.
//!
//! Mutated from the decision loop, the isolation executor, and the
//! inventory scan. Per-key exclusion comes from the map's shard locks;
//! whole-table swaps happen only during maintenance restores, when no
//! loops are running.

use dashmap::DashMap;
use std::collections::HashSet;
use tracing::info;

use crate::types::{ComponentId, ComponentKind, ComponentRecord, ComponentStatus};

#[derive(Debug, Default)]
pub struct ComponentTable {
    records: DashMap<ComponentId, ComponentRecord>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a record exists for `id`, inserting one with `default_status`
    /// when the component was never seen. Existing records are untouched.
    pub fn observe(&self, id: &ComponentId, default_status: ComponentStatus) {
        self.records
            .entry(id.clone())
            .or_insert_with(|| ComponentRecord::new(id.clone(), default_status));
    }

    /// Seed a full record (startup inventory). Existing entries win.
    pub fn seed(&self, record: ComponentRecord) {
        self.records.entry(record.id.clone()).or_insert(record);
    }

    pub fn status(&self, id: &ComponentId) -> Option<ComponentStatus> {
        self.records.get(id).map(|record| record.status)
    }

    pub fn get(&self, id: &ComponentId) -> Option<ComponentRecord> {
        self.records.get(id).map(|record| record.clone())
    }

    /// Transition a component's status, creating the record if the
    /// component was never seen. Logs actual changes only.
    pub fn set_status(&self, id: &ComponentId, status: ComponentStatus) {
        let mut record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| ComponentRecord::new(id.clone(), ComponentStatus::Unknown));
        if record.status != status {
            info!(component = %id, from = %record.status, to = %status, "Component status changed");
            record.status = status;
        }
    }

    /// Promote unverified service and driver records to healthy, skipping
    /// any named in `flagged`. DCOM registrations have no inventory check,
    /// so they stay unknown until events arrive for them.
    pub fn promote_unknown(&self, flagged: &HashSet<ComponentId>) -> usize {
        let mut promoted = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.status == ComponentStatus::Unknown
                && record.id.kind != ComponentKind::DcomClass
                && !flagged.contains(&record.id)
            {
                record.status = ComponentStatus::Healthy;
                promoted += 1;
            }
        }
        promoted
    }

    /// Point-in-time copy of every record, ordered by id so serialized
    /// snapshots are stable.
    pub fn snapshot(&self) -> Vec<ComponentRecord> {
        let mut records: Vec<ComponentRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Replace the whole table with a snapshot. Restore-time only; callers
    /// must ensure no loops are mutating concurrently.
    pub fn replace_all(&self, records: Vec<ComponentRecord>) {
        self.records.clear();
        for record in records {
            self.records.insert(record.id.clone(), record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_by_status(&self, status: ComponentStatus) -> usize {
        self.records.iter().filter(|entry| entry.value().status == status).count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_inserts_once() {
        let table = ComponentTable::new();
        let id = ComponentId::service("Spooler");

        table.observe(&id, ComponentStatus::Healthy);
        table.observe(&id, ComponentStatus::Degraded);

        assert_eq!(table.status(&id), Some(ComponentStatus::Healthy));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn set_status_creates_and_transitions() {
        let table = ComponentTable::new();
        let id = ComponentId::driver("netkvm");

        table.set_status(&id, ComponentStatus::Isolated);
        assert_eq!(table.status(&id), Some(ComponentStatus::Isolated));
        assert_eq!(table.count_by_status(ComponentStatus::Isolated), 1);
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let table = ComponentTable::new();
        table.set_status(&ComponentId::service("zeta"), ComponentStatus::Healthy);
        table.set_status(&ComponentId::driver("alpha"), ComponentStatus::Degraded);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.windows(2).all(|w| w[0].id <= w[1].id));

        // Later mutations do not leak into the snapshot.
        table.set_status(&ComponentId::service("zeta"), ComponentStatus::Isolated);
        assert!(snapshot.iter().all(|r| r.status != ComponentStatus::Isolated));
    }

    #[test]
    fn replace_all_swaps_contents() {
        let table = ComponentTable::new();
        table.set_status(&ComponentId::service("old"), ComponentStatus::Isolated);

        let restored = vec![ComponentRecord::new(
            ComponentId::service("new"),
            ComponentStatus::Healthy,
        )];
        table.replace_all(restored);

        assert_eq!(table.len(), 1);
        assert_eq!(table.status(&ComponentId::service("new")), Some(ComponentStatus::Healthy));
        assert_eq!(table.status(&ComponentId::service("old")), None);
    }

    #[test]
    fn promote_unknown_skips_flagged_and_dcom() {
        let table = ComponentTable::new();
        let clean = ComponentId::service("clean");
        let flagged = ComponentId::service("broken");
        let dcom = ComponentId::dcom("4991D34B");
        table.seed(ComponentRecord::new(clean.clone(), ComponentStatus::Unknown));
        table.seed(ComponentRecord::new(flagged.clone(), ComponentStatus::Unknown));
        table.seed(ComponentRecord::new(dcom.clone(), ComponentStatus::Unknown));

        let skip: HashSet<ComponentId> = [flagged.clone()].into_iter().collect();
        assert_eq!(table.promote_unknown(&skip), 1);

        assert_eq!(table.status(&clean), Some(ComponentStatus::Healthy));
        assert_eq!(table.status(&flagged), Some(ComponentStatus::Unknown));
        assert_eq!(table.status(&dcom), Some(ComponentStatus::Unknown));
    }
}
