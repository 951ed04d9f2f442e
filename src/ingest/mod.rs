//! Event ingestion loop.
//!
//! Polls the platform event source, filters by the current relevance
//! policy, and feeds the bounded raw-event queue. Backpressure is by drop:
//! a full queue sheds the newest event with a warning rather than stall
//! the poll cadence.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::EventSource;
use crate::config::PolicyHandle;
use crate::types::RawEvent;

/// Poll pacing. The interval applies after an empty poll; a batch with
/// events triggers an immediate re-poll so bursts drain quickly.
#[derive(Debug, Clone, Copy)]
pub struct IngestCadence {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

/// Counters the ingest loop reports on exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub polls: u64,
    pub relevant: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub source_errors: u64,
}

pub struct EventIngest<S: EventSource> {
    source: S,
    policies: Arc<PolicyHandle>,
    tx: mpsc::Sender<RawEvent>,
    cadence: IngestCadence,
    cancel: CancellationToken,
    stats: IngestStats,
}

impl<S: EventSource> EventIngest<S> {
    pub fn new(
        source: S,
        policies: Arc<PolicyHandle>,
        tx: mpsc::Sender<RawEvent>,
        cadence: IngestCadence,
        cancel: CancellationToken,
    ) -> Self {
        Self { source, policies, tx, cadence, cancel, stats: IngestStats::default() }
    }

    pub async fn run(mut self) -> IngestStats {
        info!(source = self.source.source_name(), "Event ingest starting");

        loop {
            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = self.source.poll() => polled,
            };

            match polled {
                Ok(events) => {
                    self.stats.polls += 1;
                    let batch = events.len();
                    for event in events {
                        self.ingest(event);
                    }
                    if batch == 0 && !self.pause(self.cadence.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    self.stats.source_errors += 1;
                    warn!(
                        source = self.source.source_name(),
                        error = %e,
                        "Event source poll failed, backing off"
                    );
                    if !self.pause(self.cadence.error_backoff).await {
                        break;
                    }
                }
            }
        }

        info!(
            polls = self.stats.polls,
            forwarded = self.stats.forwarded,
            dropped = self.stats.dropped,
            "Event ingest stopped"
        );
        self.stats
    }

    /// Sleep unless cancelled. Returns false when the loop should exit.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn ingest(&mut self, event: RawEvent) {
        if !self.policies.load().classifier.is_relevant(&event) {
            debug!(source = %event.source, id = event.event_id, "Irrelevant event discarded");
            return;
        }
        self.stats.relevant += 1;
        match self.tx.try_send(event) {
            Ok(()) => self.stats.forwarded += 1,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.dropped += 1;
                warn!(
                    source = %event.source,
                    id = event.event_id,
                    "Raw event queue full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped += 1;
                warn!("Decision loop gone, event dropped");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::adapters::sim::ScriptedEventSource;
    use crate::config::{GuardianConfig, Policies};
    use crate::types::Severity;

    fn raw(source: &str, level: Severity) -> RawEvent {
        RawEvent {
            timestamp: Utc::now(),
            source: source.to_string(),
            event_id: 1,
            level,
            message: "x".to_string(),
        }
    }

    fn policies() -> Arc<PolicyHandle> {
        PolicyHandle::new(Policies::compile(&GuardianConfig::default()).unwrap())
    }

    fn cadence() -> IngestCadence {
        IngestCadence {
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn forwards_relevant_events_only() {
        let source = ScriptedEventSource::single(vec![
            raw("Disk", Severity::Warning),
            raw("Unlisted", Severity::Warning),
            raw("DCOM", Severity::Error),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let ingest = EventIngest::new(source, policies(), tx, cadence(), cancel.clone());

        let run = tokio::spawn(ingest.run());
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        let stats = run.await.unwrap();

        assert_eq!(stats.relevant, 2);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.dropped, 0);
        assert_eq!(rx.recv().await.unwrap().source, "Disk");
        assert_eq!(rx.recv().await.unwrap().source, "DCOM");
    }

    #[tokio::test]
    async fn full_queue_sheds_events() {
        let source = ScriptedEventSource::single(vec![
            raw("Disk", Severity::Warning),
            raw("Disk", Severity::Warning),
            raw("Disk", Severity::Warning),
        ]);
        // Capacity one and no consumer: two of three must drop.
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let ingest = EventIngest::new(source, policies(), tx, cadence(), cancel.clone());

        let run = tokio::spawn(ingest.run());
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        let stats = run.await.unwrap();

        assert_eq!(stats.relevant, 3);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.dropped, 2);
    }
}
