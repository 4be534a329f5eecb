//! Post-commit audit delivery.
//!
//! The audit fact is derived from the write that was committed, never from
//! the request. It is handed to a background task once the commit returns, so
//! the caller neither waits for the sink nor loses the fact when it stops
//! waiting. Delivery failures and timeouts are logged and counted; the
//! committed ledger stays as is.

use pack_rsvp_core::audit::{AuditEntry, AuditError, AuditKind, AuditSink, LogAuditSink};
use pack_rsvp_core::store::{LedgerWrite, RsvpMutation};
use pack_rsvp_runtime::metrics::AuditMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default bound on a single delivery.
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Audit fact for a committed write. `None` when nothing was written.
#[must_use]
pub fn entry_for(write: &LedgerWrite, actor: &str) -> Option<AuditEntry> {
    let (kind, record, attendee_count) = match &write.mutation {
        RsvpMutation::Unchanged(_) => return None,
        RsvpMutation::Create(r) => (AuditKind::RsvpRecorded, Some(r), r.attendee_count()),
        RsvpMutation::Amend(r) => (AuditKind::RsvpAmended, Some(r), r.attendee_count()),
        RsvpMutation::Cancel(r) => (AuditKind::RsvpCancelled, Some(r), 0),
        RsvpMutation::CounterOnly => (AuditKind::LedgerRepaired, None, 0),
    };

    Some(AuditEntry {
        kind,
        event_id: write.event_id.clone(),
        rsvp_id: record.map(|r| r.id.clone()),
        submitter_id: record.map(|r| r.submitter_id.clone()),
        attendee_count,
        delta: write.delta,
        actor: actor.to_string(),
        at: write.at,
    })
}

/// Hands audit facts to the sink with a bounded wait.
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl AuditDispatcher {
    /// Dispatcher over `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Deliver one fact. Never fails the caller.
    pub async fn deliver(&self, entry: AuditEntry) {
        let kind = entry.kind;
        let event_id = entry.event_id.clone();

        let outcome = match tokio::time::timeout(self.timeout, self.sink.record(entry)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        if let Err(error) = outcome {
            tracing::warn!(
                kind = kind.as_str(),
                event_id = %event_id,
                error = %error,
                "Audit delivery failed; commit stands"
            );
            AuditMetrics::record_failure(kind.as_str());
        }
    }

    /// Deliver `entry` on a spawned task.
    ///
    /// The task owns the entry and the timeout, so it completes even if the
    /// caller's future is dropped. The handle is only useful to tests.
    pub fn dispatch(&self, entry: AuditEntry) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(entry).await })
    }

    /// Derive the fact for `write` and dispatch it, if there is one.
    ///
    /// Returns as soon as the task is spawned.
    pub fn deliver_for(&self, write: &LedgerWrite, actor: &str) {
        if let Some(entry) = entry_for(write, actor) {
            let _detached = self.dispatch(entry);
        }
    }
}

impl Default for AuditDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink), DEFAULT_AUDIT_TIMEOUT)
    }
}

impl std::fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pack_rsvp_core::environment::Clock;
    use pack_rsvp_core::model::EventId;
    use pack_rsvp_core::version::Version;
    use pack_rsvp_testing::fixtures::{family, rsvp_record};
    use pack_rsvp_testing::{HangingAuditSink, RecordingAuditSink, test_clock};

    fn write(mutation: RsvpMutation, delta: i64) -> LedgerWrite {
        LedgerWrite {
            event_id: EventId::new("e1"),
            expected_version: Version::new(1),
            participants_after: 4,
            delta,
            mutation,
            at: test_clock().now(),
        }
    }

    #[test]
    fn facts_follow_the_committed_mutation() {
        let record = rsvp_record("r-1", "e1", "u1", family(3));

        let created = entry_for(&write(RsvpMutation::Create(record.clone()), 3), "u1").unwrap();
        assert_eq!(created.kind, AuditKind::RsvpRecorded);
        assert_eq!(created.attendee_count, 3);
        assert_eq!(created.delta, 3);

        let cancelled = entry_for(&write(RsvpMutation::Cancel(record.clone()), -3), "admin:x").unwrap();
        assert_eq!(cancelled.kind, AuditKind::RsvpCancelled);
        assert_eq!(cancelled.attendee_count, 0);
        assert_eq!(cancelled.actor, "admin:x");

        assert!(entry_for(&write(RsvpMutation::Unchanged(record), 0), "u1").is_none());

        let repaired = entry_for(&write(RsvpMutation::CounterOnly, -1), "reconcile").unwrap();
        assert_eq!(repaired.kind, AuditKind::LedgerRepaired);
        assert!(repaired.rsvp_id.is_none());
    }

    #[tokio::test]
    async fn delivers_to_the_sink() {
        let sink = RecordingAuditSink::new();
        let dispatcher = AuditDispatcher::new(Arc::new(sink.clone()), DEFAULT_AUDIT_TIMEOUT);
        let record = rsvp_record("r-1", "e1", "u1", family(1));

        dispatcher.deliver_for(&write(RsvpMutation::Create(record), 1), "u1");

        assert_eq!(sink.wait_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn hanging_sink_is_cut_off() {
        let dispatcher =
            AuditDispatcher::new(Arc::new(HangingAuditSink), Duration::from_millis(20));
        let started = std::time::Instant::now();
        let entry = entry_for(&write(RsvpMutation::CounterOnly, 1), "reconcile").unwrap();

        dispatcher.dispatch(entry).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn delivery_outlives_the_caller() {
        let sink = RecordingAuditSink::with_delay(Duration::from_millis(50));
        let dispatcher = AuditDispatcher::new(Arc::new(sink.clone()), DEFAULT_AUDIT_TIMEOUT);
        let record = rsvp_record("r-1", "e1", "u1", family(1));

        let entry = entry_for(&write(RsvpMutation::Create(record), 1), "u1").unwrap();
        let handle = dispatcher.dispatch(entry);
        drop(dispatcher);

        assert!(sink.entries().is_empty());
        handle.await.unwrap();
        assert_eq!(sink.entries().len(), 1);
    }
}
