//! Backfill, reconciliation and batch reads.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use pack_rsvp::audit::AuditDispatcher;
use pack_rsvp::commit::CommitEnvironment;
use pack_rsvp::jobs::{BackfillJob, LegacyExport, RECONCILE_ACTOR, reconcile};
use pack_rsvp::query::RsvpQueries;
use pack_rsvp::submission::Submission;
use pack_rsvp::{RsvpError, RsvpService};
use pack_rsvp_core::audit::AuditKind;
use pack_rsvp_core::model::{EventId, SubmitterId};
use pack_rsvp_runtime::RetryPolicy;
use pack_rsvp_testing::fixtures::{contact, event, family, rsvp_record};
use pack_rsvp_testing::{
    InMemoryLedgerStore, RecordingAuditSink, SequentialIdGenerator, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

fn service(store: &InMemoryLedgerStore, sink: &RecordingAuditSink) -> RsvpService {
    RsvpService::new(Arc::new(store.clone()))
        .with_environment(CommitEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(SequentialIdGenerator::new()),
        ))
        .with_audit(AuditDispatcher::new(
            Arc::new(sink.clone()),
            Duration::from_millis(50),
        ))
        .with_retry(
            RetryPolicy::builder()
                .max_attempts(4)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        )
}

const EXPORT: &str = r#"{"rsvps": [
    {"id": "d1", "eventId": "campout", "userId": "u1", "familyName": "Rivera",
     "email": "rivera@example.org", "attendees": [{"name": "Ana"}, {"name": "Luis"}]},
    {"id": "d2", "eventId": "campout", "contactName": "Lee",
     "contactEmail": "lee@example.org", "attendees": [{"name": "Kim", "isAdult": true}]},
    {"id": "d3", "eventId": "gone", "familyName": "Park",
     "email": "park@example.org", "attendees": [{"name": "Jo"}]},
    {"id": "d4", "eventId": "campout", "familyName": "Nobody",
     "email": "nobody@example.org", "attendees": []},
    {"id": "d5", "eventId": "campout", "familyName": "Old",
     "email": "old@example.org", "attendees": 4}
]}"#;

#[tokio::test]
async fn test_backfill_replays_and_is_rerunnable() {
    let store = InMemoryLedgerStore::new();
    store.insert_event(event("campout", Some(10)));
    let sink = RecordingAuditSink::new();
    let job = BackfillJob::new(service(&store, &sink));
    let export = serde_json::from_str::<LegacyExport>(EXPORT).unwrap();

    let first = job.run_export(export.clone()).await;
    assert_eq!(first.created, 2);
    assert_eq!(first.total(), 5);
    let rejected: Vec<(&str, &str)> = first
        .rejected
        .iter()
        .map(|r| (r.legacy_id.as_str(), r.error_kind))
        .collect();
    assert_eq!(
        rejected,
        vec![("d3", "event_not_found"), ("d4", "invalid_input"), ("d5", "invalid_input")]
    );

    let id = EventId::new("campout");
    assert_eq!(store.event(&id).unwrap().current_participants, 3);
    let audited = sink.wait_for(2).await.len();
    assert_eq!(audited, 2);

    let second = job.run_export(export).await;
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(store.event(&id).unwrap().current_participants, 3);
    assert_eq!(store.rsvps_of(&id).len(), 2);
    assert_eq!(sink.entries().len(), audited);
}

#[tokio::test]
async fn test_reconcile_repairs_drift() {
    let store = InMemoryLedgerStore::new();
    store.insert_event(event("campout", Some(20)));
    let id = EventId::new("campout");
    store.insert_rsvp_raw(rsvp_record("r-1", "campout", "u1", family(3)));
    store.insert_rsvp_raw(rsvp_record("r-2", "campout", "u2", family(4)));
    store.set_participants(&id, 5);
    let sink = RecordingAuditSink::new();
    let service = service(&store, &sink);

    let report = reconcile(&service, &id).await.unwrap();

    assert!(report.repaired);
    assert_eq!(report.previous_total, 5);
    assert_eq!(report.recomputed_total, 7);
    assert_eq!(report.delta, 2);
    assert_eq!(store.event(&id).unwrap().current_participants, 7);

    let entry = sink.wait_for(1).await.pop().unwrap();
    assert_eq!(entry.kind, AuditKind::LedgerRepaired);
    assert_eq!(entry.actor, RECONCILE_ACTOR);

    let again = reconcile(&service, &id).await.unwrap();
    assert!(!again.repaired);
    assert_eq!(again.delta, 0);
    assert_eq!(sink.entries().len(), 1);
}

#[tokio::test]
async fn test_reconcile_refuses_overbooked_roster() {
    let store = InMemoryLedgerStore::new();
    store.insert_event(event("campout", Some(4)));
    let id = EventId::new("campout");
    store.insert_rsvp_raw(rsvp_record("r-1", "campout", "u1", family(3)));
    store.insert_rsvp_raw(rsvp_record("r-2", "campout", "u2", family(3)));
    store.set_participants(&id, 3);
    let sink = RecordingAuditSink::new();

    let err = reconcile(&service(&store, &sink), &id).await.unwrap_err();

    assert!(matches!(err, RsvpError::CapacityExceeded { .. }));
    assert_eq!(store.event(&id).unwrap().current_participants, 3);
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn test_reconcile_missing_event() {
    let store = InMemoryLedgerStore::new();
    let sink = RecordingAuditSink::new();

    let err = reconcile(&service(&store, &sink), &EventId::new("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, RsvpError::EventNotFound(_)));
}

#[tokio::test]
async fn test_queries_see_committed_submissions() {
    let store = InMemoryLedgerStore::new();
    store.insert_event(event("campout", Some(10)));
    store.insert_event(event("hike", None));
    let sink = RecordingAuditSink::new();
    let service = service(&store, &sink);

    for (event_id, family_id, n) in [("campout", "u1", 2), ("hike", "u1", 1), ("campout", "u2", 4)] {
        service
            .submit(
                SubmitterId::new(family_id),
                Submission::new(event_id, family(n), contact("Rivera")),
            )
            .await
            .unwrap();
    }

    let queries = RsvpQueries::new(Arc::new(store.clone()));

    let total = queries.event_total(&EventId::new("campout")).await.unwrap();
    assert_eq!(total.current_participants, 6);
    assert_eq!(total.remaining_spots, Some(4));

    let roster = queries.roster(&EventId::new("campout")).await.unwrap();
    assert_eq!(roster.rsvps.len(), 2);
    assert!(!roster.drift);

    let mine = queries.submitter_rsvps(&SubmitterId::new("u1")).await.unwrap();
    assert_eq!(mine.len(), 2);

    let batch = queries
        .batch_totals(&[EventId::new("hike"), EventId::new("campout"), EventId::new("gone")])
        .await;
    assert_eq!(batch.totals.get(&EventId::new("campout")), Some(&6));
    assert_eq!(batch.totals.get(&EventId::new("hike")), Some(&1));
    assert_eq!(batch.unresolved, vec![EventId::new("gone")]);
}
