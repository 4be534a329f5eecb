//! Read-only queries over committed RSVPs and event ledgers.
//!
//! Nothing here writes or takes part in a commit. Results reflect committed
//! state at read time and may be stale by the time the caller uses them.

use crate::config::QueryConfig;
use crate::error::RsvpError;
use pack_rsvp_core::model::{EventId, RsvpRecord, SubmitterId};
use pack_rsvp_core::store::LedgerStore;
use pack_rsvp_runtime::metrics::QueryMetrics;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Ledger counter of one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTotal {
    /// The event
    pub event_id: EventId,
    /// Committed attendees
    pub current_participants: u32,
    /// Cap, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Spots left, if capped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_spots: Option<u32>,
}

/// All RSVPs of one event with both totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    /// The event
    pub event_id: EventId,
    /// RSVPs, newest first
    pub rsvps: Vec<RsvpRecord>,
    /// Sum of `attendeeCount` over `rsvps`
    pub attendee_sum: u64,
    /// Ledger counter read alongside
    pub ledger_total: u32,
    /// Whether the two totals disagree
    pub drift: bool,
}

/// Result of [`RsvpQueries::batch_totals`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTotals {
    /// Counter per resolved event
    pub totals: BTreeMap<EventId, u32>,
    /// Ids that were missing or whose chunk failed
    pub unresolved: Vec<EventId>,
}

/// Query surface.
#[derive(Clone)]
pub struct RsvpQueries {
    store: Arc<dyn LedgerStore>,
    chunk_size: usize,
    concurrency: usize,
}

impl std::fmt::Debug for RsvpQueries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsvpQueries")
            .field("chunk_size", &self.chunk_size)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl RsvpQueries {
    /// Queries over `store` with chunks of 10 and 4 in flight.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            chunk_size: 10,
            concurrency: 4,
        }
    }

    /// Queries configured from `config`.
    #[must_use]
    pub fn from_config(store: Arc<dyn LedgerStore>, config: &QueryConfig) -> Self {
        Self {
            store,
            chunk_size: config.chunk_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Current ledger counter of an event.
    ///
    /// # Errors
    ///
    /// [`RsvpError::EventNotFound`], or [`RsvpError::TemporarilyUnavailable`]
    /// if the read fails.
    pub async fn event_total(&self, event_id: &EventId) -> Result<EventTotal, RsvpError> {
        let current = self
            .store
            .get_event(event_id.clone())
            .await?
            .ok_or_else(|| RsvpError::EventNotFound(event_id.clone()))?;

        Ok(EventTotal {
            event_id: current.event.id.clone(),
            current_participants: current.event.current_participants,
            capacity: current.event.capacity.map(u32::from),
            remaining_spots: current.event.remaining_spots(),
        })
    }

    /// Every RSVP of an event, newest first, with the ledger counter.
    ///
    /// # Errors
    ///
    /// [`RsvpError::EventNotFound`], or [`RsvpError::TemporarilyUnavailable`]
    /// if a read fails.
    pub async fn roster(&self, event_id: &EventId) -> Result<Roster, RsvpError> {
        let current = self
            .store
            .get_event(event_id.clone())
            .await?
            .ok_or_else(|| RsvpError::EventNotFound(event_id.clone()))?;

        let mut rsvps = self.store.rsvps_for_event(event_id.clone()).await?;
        sort_newest_first(&mut rsvps);

        let attendee_sum = rsvps.iter().map(|r| u64::from(r.attendee_count())).sum();
        let ledger_total = current.event.current_participants;
        let drift = attendee_sum != u64::from(ledger_total);

        if drift {
            tracing::warn!(
                event_id = %event_id,
                attendee_sum,
                ledger_total,
                "Ledger drift: counter disagrees with roster"
            );
        }

        Ok(Roster {
            event_id: event_id.clone(),
            rsvps,
            attendee_sum,
            ledger_total,
            drift,
        })
    }

    /// A family's RSVPs across events, newest first.
    ///
    /// # Errors
    ///
    /// [`RsvpError::TemporarilyUnavailable`] if the read fails.
    pub async fn submitter_rsvps(
        &self,
        submitter_id: &SubmitterId,
    ) -> Result<Vec<RsvpRecord>, RsvpError> {
        let mut rsvps = self.store.rsvps_for_submitter(submitter_id.clone()).await?;
        sort_newest_first(&mut rsvps);
        Ok(rsvps)
    }

    /// Ledger counters of many events.
    ///
    /// Ids are deduplicated and read in chunks, a bounded number at a time.
    /// A failed chunk does not fail the call: its ids land in `unresolved`,
    /// together with ids of events that do not exist.
    pub async fn batch_totals(&self, event_ids: &[EventId]) -> BatchTotals {
        let unique: Vec<EventId> = event_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let reads = unique.chunks(self.chunk_size).map(|chunk| {
            let permits = Arc::clone(&permits);
            let chunk = chunk.to_vec();
            async move {
                let _permit = permits.acquire().await;
                let result = self.store.get_events(chunk.clone()).await;
                (chunk, result)
            }
        });

        let mut batch = BatchTotals::default();
        for (chunk, result) in futures::future::join_all(reads).await {
            match result {
                Ok(found) => {
                    for current in found {
                        batch
                            .totals
                            .insert(current.event.id, current.event.current_participants);
                    }
                    batch
                        .unresolved
                        .extend(chunk.into_iter().filter(|id| !batch.totals.contains_key(id)));
                }
                Err(error) => {
                    tracing::warn!(
                        chunk_len = chunk.len(),
                        error = %error,
                        "Batch total chunk failed"
                    );
                    batch.unresolved.extend(chunk);
                }
            }
        }

        if !batch.unresolved.is_empty() {
            QueryMetrics::record_unresolved(batch.unresolved.len());
        }
        batch
    }
}

fn sort_newest_first(rsvps: &mut [RsvpRecord]) {
    rsvps.sort_by(|a, b| {
        b.submitted_at
            .cmp(&a.submitted_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration;
    use pack_rsvp_testing::InMemoryLedgerStore;
    use pack_rsvp_testing::fixtures::{event, family, rsvp_record};

    fn queries(store: &InMemoryLedgerStore) -> RsvpQueries {
        RsvpQueries::from_config(
            Arc::new(store.clone()),
            &QueryConfig {
                chunk_size: 2,
                concurrency: 2,
            },
        )
    }

    #[tokio::test]
    async fn event_total_reports_remaining_spots() {
        let store = InMemoryLedgerStore::new();
        let mut e = event("e1", Some(10));
        e.current_participants = 7;
        store.insert_event(e);

        let total = queries(&store).event_total(&EventId::new("e1")).await.unwrap();
        assert_eq!(total.current_participants, 7);
        assert_eq!(total.remaining_spots, Some(3));

        assert!(matches!(
            queries(&store).event_total(&EventId::new("nope")).await,
            Err(RsvpError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn roster_is_newest_first_and_flags_drift() {
        let store = InMemoryLedgerStore::new();
        let mut e = event("e1", None);
        e.current_participants = 4;
        store.insert_event(e);

        let older = rsvp_record("r-1", "e1", "u1", family(2));
        let mut newer = rsvp_record("r-2", "e1", "u2", family(3));
        newer.submitted_at = older.submitted_at + Duration::minutes(5);
        store.insert_rsvp_raw(older);
        store.insert_rsvp_raw(newer);

        let roster = queries(&store).roster(&EventId::new("e1")).await.unwrap();
        assert_eq!(roster.rsvps[0].id.as_str(), "r-2");
        assert_eq!(roster.attendee_sum, 5);
        assert_eq!(roster.ledger_total, 4);
        assert!(roster.drift);
    }

    #[tokio::test]
    async fn batch_totals_report_partial_results() {
        let store = InMemoryLedgerStore::new();
        for id in ["a", "b", "c", "d"] {
            store.insert_event(event(id, None));
        }
        store.set_participants(&EventId::new("a"), 3);
        store.fail_lookups_for(EventId::new("c"));

        let ids: Vec<EventId> = ["a", "b", "c", "d", "x", "a"]
            .into_iter()
            .map(EventId::new)
            .collect();
        let batch = queries(&store).batch_totals(&ids).await;

        // Chunks: [a, b] [c, d] [x]; the middle one fails.
        assert_eq!(batch.totals.get(&EventId::new("a")), Some(&3));
        assert_eq!(batch.totals.get(&EventId::new("b")), Some(&0));
        assert_eq!(
            batch.unresolved,
            vec![EventId::new("c"), EventId::new("d"), EventId::new("x")]
        );
    }
}
