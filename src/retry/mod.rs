//! Per-component repair retry accounting.
//!
//! Each component gets `max_attempts` in-place repairs inside a rolling
//! window. The window is applied lazily when a record is read: an entry
//! whose last attempt is older than the window behaves as if absent. A
//! successful repair removes the record entirely, so the next warning
//! starts a fresh budget. Entries are sharded per key, so bookkeeping for
//! unrelated components never contends.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::types::ComponentId;

/// Retry policy tunables.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, window: Duration::hours(1) }
    }
}

/// Attempt count and last-attempt time for one component.
#[derive(Debug, Clone, Copy)]
pub struct RetryRecord {
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

pub struct RetryLedger {
    policy: RetryPolicy,
    records: DashMap<ComponentId, RetryRecord>,
}

impl RetryLedger {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, records: DashMap::new() }
    }

    /// Whether another repair attempt is permitted right now.
    ///
    /// A refusal does not touch the record, so repeated checks cannot keep
    /// a stale window alive.
    pub fn should_attempt_repair(&self, component: &ComponentId, now: DateTime<Utc>) -> bool {
        let expired = match self.records.get(component) {
            Some(record) => {
                if now.signed_duration_since(record.last_attempt) > self.policy.window {
                    true
                } else {
                    return record.count < self.policy.max_attempts;
                }
            }
            None => return true,
        };
        // Guard dropped above; safe to take the shard again.
        if expired {
            self.records.remove(component);
        }
        true
    }

    /// Record a repair attempt outcome. Success clears the record; failure
    /// counts against the budget and refreshes the window anchor.
    pub fn record_attempt(&self, component: &ComponentId, now: DateTime<Utc>, succeeded: bool) {
        if succeeded {
            self.records.remove(component);
            return;
        }
        let mut record = self
            .records
            .entry(component.clone())
            .or_insert(RetryRecord { count: 0, last_attempt: now });
        record.count += 1;
        record.last_attempt = now;
    }

    /// Current failure count for a component (0 when untracked). Window
    /// expiry is not applied; this is for logging.
    pub fn attempt_count(&self, component: &ComponentId) -> u32 {
        self.records.get(component).map_or(0, |record| record.count)
    }

    /// Number of components with live retry records.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RetryLedger {
        RetryLedger::new(RetryPolicy::default())
    }

    #[test]
    fn budget_allows_max_attempts_then_refuses() {
        let ledger = ledger();
        let spooler = ComponentId::service("Spooler");
        let now = Utc::now();

        for _ in 0..3 {
            assert!(ledger.should_attempt_repair(&spooler, now));
            ledger.record_attempt(&spooler, now, false);
        }
        assert!(!ledger.should_attempt_repair(&spooler, now));
        assert_eq!(ledger.attempt_count(&spooler), 3);
    }

    #[test]
    fn success_clears_the_record() {
        let ledger = ledger();
        let spooler = ComponentId::service("Spooler");
        let now = Utc::now();

        ledger.record_attempt(&spooler, now, false);
        ledger.record_attempt(&spooler, now, false);
        ledger.record_attempt(&spooler, now, true);

        assert_eq!(ledger.attempt_count(&spooler), 0);
        assert_eq!(ledger.tracked(), 0);
        assert!(ledger.should_attempt_repair(&spooler, now));
    }

    #[test]
    fn window_expiry_resets_the_budget() {
        let ledger = ledger();
        let spooler = ComponentId::service("Spooler");
        let start = Utc::now();

        for _ in 0..3 {
            ledger.record_attempt(&spooler, start, false);
        }
        assert!(!ledger.should_attempt_repair(&spooler, start));

        // Just inside the window: still refused, and the refusal must not
        // refresh the anchor.
        let almost = start + Duration::minutes(59);
        assert!(!ledger.should_attempt_repair(&spooler, almost));

        let later = start + Duration::minutes(61);
        assert!(ledger.should_attempt_repair(&spooler, later));
        assert_eq!(ledger.attempt_count(&spooler), 0);
    }

    #[test]
    fn components_are_tracked_independently() {
        let ledger = ledger();
        let spooler = ComponentId::service("Spooler");
        let netkvm = ComponentId::driver("netkvm");
        let now = Utc::now();

        for _ in 0..3 {
            ledger.record_attempt(&spooler, now, false);
        }
        assert!(!ledger.should_attempt_repair(&spooler, now));
        assert!(ledger.should_attempt_repair(&netkvm, now));
        assert_eq!(ledger.attempt_count(&netkvm), 0);
    }

    #[test]
    fn failure_after_expiry_starts_a_fresh_budget() {
        let ledger = ledger();
        let spooler = ComponentId::service("Spooler");
        let start = Utc::now();

        for _ in 0..3 {
            ledger.record_attempt(&spooler, start, false);
        }
        let later = start + Duration::hours(2);
        assert!(ledger.should_attempt_repair(&spooler, later));
        ledger.record_attempt(&spooler, later, false);
        assert_eq!(ledger.attempt_count(&spooler), 1);
    }
}
