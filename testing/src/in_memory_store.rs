//! In-memory ledger store for fast, deterministic testing.
//!
//! [`InMemoryLedgerStore`] honours the same contract as the Postgres store:
//! `commit` is version-checked and applies the RSVP mutation together with the
//! counter update, or nothing. On top of that it can inject faults:
//!
//! - [`InMemoryLedgerStore::inject_conflicts`]: the next `n` commits report a
//!   concurrent modification
//! - [`InMemoryLedgerStore::pause_after_snapshot`]: the next `n` snapshot
//!   reads wait for each other, so racing submissions all see the same
//!   "before" state
//! - [`InMemoryLedgerStore::hold_next_snapshot`]: the next snapshot read
//!   waits until the test releases it, so the test can change the store
//!   between a snapshot and its commit
//! - [`InMemoryLedgerStore::fail_lookups_for`]: reads of one event fail
//! - [`InMemoryLedgerStore::fail_next_commit`]: the next commit fails with a
//!   given error

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use pack_rsvp_core::model::{Event, EventId, RsvpId, RsvpRecord, SubmitterId, VersionedEvent};
use pack_rsvp_core::store::{
    LedgerSnapshot, LedgerStore, LedgerWrite, RsvpMutation, RsvpSelector, StoreError, StoreFuture,
};
use pack_rsvp_core::version::Version;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Barrier, oneshot};

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, (Event, Version)>,
    rsvps: HashMap<RsvpId, RsvpRecord>,
    keys: HashMap<String, RsvpId>,
    pending_conflicts: u32,
    commit_failure: Option<StoreError>,
    failing_events: HashSet<EventId>,
    applied_commits: u64,
}

impl State {
    fn lookup(&self, event_id: &EventId) -> Result<Option<(Event, Version)>, StoreError> {
        if self.failing_events.contains(event_id) {
            return Err(StoreError::Database(format!("injected lookup failure for {event_id}")));
        }
        Ok(self.events.get(event_id).cloned())
    }

    fn select(&self, selector: &RsvpSelector) -> Option<RsvpRecord> {
        let id = match selector {
            RsvpSelector::Key(key) => self.keys.get(&key.storage_key())?,
            RsvpSelector::Id(id) => id,
        };
        self.rsvps.get(id).cloned()
    }

    fn apply(&mut self, mutation: RsvpMutation) -> Result<(), StoreError> {
        match mutation {
            RsvpMutation::Create(record) => {
                let key = record.idempotency_key().storage_key();
                if self.keys.contains_key(&key) || self.rsvps.contains_key(&record.id) {
                    return Err(StoreError::Database(format!(
                        "duplicate RSVP for key {key}"
                    )));
                }
                self.keys.insert(key, record.id.clone());
                self.rsvps.insert(record.id.clone(), record);
            }
            RsvpMutation::Amend(record) => {
                if !self.rsvps.contains_key(&record.id) {
                    return Err(StoreError::Database(format!(
                        "amended RSVP {} does not exist",
                        record.id
                    )));
                }
                self.rsvps.insert(record.id.clone(), record);
            }
            RsvpMutation::Cancel(record) => {
                if self.rsvps.remove(&record.id).is_none() {
                    return Err(StoreError::Database(format!(
                        "cancelled RSVP {} does not exist",
                        record.id
                    )));
                }
                self.keys.remove(&record.idempotency_key().storage_key());
            }
            RsvpMutation::Unchanged(_) | RsvpMutation::CounterOnly => {}
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SnapshotGate {
    barrier: Arc<Barrier>,
    remaining: usize,
}

#[derive(Debug)]
struct HeldSnapshot {
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Test-side handle of [`InMemoryLedgerStore::hold_next_snapshot`].
#[derive(Debug)]
pub struct SnapshotHold {
    reached: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl SnapshotHold {
    /// Wait until the held read has taken its snapshot.
    pub async fn reached(&mut self) {
        if let Some(reached) = self.reached.take() {
            let _ = reached.await;
        }
    }

    /// Let the held read return. Dropping the handle does the same.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// HashMap-backed [`LedgerStore`].
///
/// # Example
///
/// ```
/// use pack_rsvp_core::model::{Capacity, Event, EventId};
/// use pack_rsvp_core::store::LedgerStore;
/// use pack_rsvp_testing::InMemoryLedgerStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryLedgerStore::new();
/// store.insert_event(Event::new(EventId::new("campout"), "Campout", Capacity::new(10)));
///
/// let event = store.get_event(EventId::new("campout")).await?;
/// assert_eq!(event.map(|e| e.event.current_participants), Some(0));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<State>>,
    gate: Arc<Mutex<Option<SnapshotGate>>>,
    hold: Arc<Mutex<Option<HeldSnapshot>>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an event document, replacing any previous one. Returns its version.
    pub fn insert_event(&self, event: Event) -> Version {
        let mut state = self.state.lock().unwrap();
        let version = state
            .events
            .get(&event.id)
            .map_or(Version::INITIAL, |(_, v)| v.next());
        state.events.insert(event.id.clone(), (event, version));
        version
    }

    /// Seed an RSVP record without touching the ledger counter.
    ///
    /// Used to set up drifted or legacy data.
    pub fn insert_rsvp_raw(&self, record: RsvpRecord) {
        let mut state = self.state.lock().unwrap();
        state
            .keys
            .insert(record.idempotency_key().storage_key(), record.id.clone());
        state.rsvps.insert(record.id.clone(), record);
    }

    /// Overwrite an event's counter outside the commit path (bumps the version).
    pub fn set_participants(&self, event_id: &EventId, participants: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some((event, version)) = state.events.get_mut(event_id) {
            event.current_participants = participants;
            *version = version.next();
        }
    }

    /// Remove an event document (its RSVPs stay).
    pub fn delete_event(&self, event_id: &EventId) {
        self.state.lock().unwrap().events.remove(event_id);
    }

    /// Current event document, bypassing fault injection.
    #[must_use]
    pub fn event(&self, event_id: &EventId) -> Option<Event> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(event_id)
            .map(|(event, _)| event.clone())
    }

    /// Current version of an event document.
    #[must_use]
    pub fn version_of(&self, event_id: &EventId) -> Option<Version> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(event_id)
            .map(|(_, version)| *version)
    }

    /// All stored RSVPs of an event, bypassing fault injection.
    #[must_use]
    pub fn rsvps_of(&self, event_id: &EventId) -> Vec<RsvpRecord> {
        self.state
            .lock()
            .unwrap()
            .rsvps
            .values()
            .filter(|r| &r.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Sum of attendee counts over an event's stored RSVPs.
    #[must_use]
    pub fn attendee_sum(&self, event_id: &EventId) -> u64 {
        self.rsvps_of(event_id)
            .iter()
            .map(|r| u64::from(r.attendee_count()))
            .sum()
    }

    /// Number of commits that actually wrote something.
    #[must_use]
    pub fn applied_commits(&self) -> u64 {
        self.state.lock().unwrap().applied_commits
    }

    /// Make the next `n` commits fail with `ConcurrencyConflict`.
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().unwrap().pending_conflicts = n;
    }

    /// Make the next commit fail with `error`.
    pub fn fail_next_commit(&self, error: StoreError) {
        self.state.lock().unwrap().commit_failure = Some(error);
    }

    /// Make every read of `event_id` fail with a database error.
    pub fn fail_lookups_for(&self, event_id: EventId) {
        self.state.lock().unwrap().failing_events.insert(event_id);
    }

    /// Hold the next `parties` snapshot reads until all of them have read.
    ///
    /// Later reads (retries) pass straight through.
    pub fn pause_after_snapshot(&self, parties: usize) {
        *self.gate.lock().unwrap() = Some(SnapshotGate {
            barrier: Arc::new(Barrier::new(parties)),
            remaining: parties,
        });
    }

    /// Hold the next snapshot read after it has read, until the returned
    /// handle is released or dropped.
    #[must_use]
    pub fn hold_next_snapshot(&self) -> SnapshotHold {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.hold.lock().unwrap() = Some(HeldSnapshot {
            reached: reached_tx,
            release: release_rx,
        });
        SnapshotHold {
            reached: Some(reached_rx),
            release: release_tx,
        }
    }

    fn take_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = self.gate.lock().unwrap();
        let current = gate.as_mut()?;
        let barrier = Arc::clone(&current.barrier);
        current.remaining -= 1;
        if current.remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<VersionedEvent>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .lookup(&event_id)?
                .map(|(event, version)| VersionedEvent { event, version }))
        })
    }

    fn get_events(&self, event_ids: Vec<EventId>) -> StoreFuture<'_, Vec<VersionedEvent>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut found = Vec::with_capacity(event_ids.len());
            for event_id in &event_ids {
                if let Some((event, version)) = state.lookup(event_id)? {
                    found.push(VersionedEvent { event, version });
                }
            }
            Ok(found)
        })
    }

    fn find_rsvp(&self, selector: RsvpSelector) -> StoreFuture<'_, Option<RsvpRecord>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().select(&selector)) })
    }

    fn load_snapshot(
        &self,
        event_id: EventId,
        selector: Option<RsvpSelector>,
    ) -> StoreFuture<'_, Option<LedgerSnapshot>> {
        Box::pin(async move {
            let snapshot = {
                let state = self.state.lock().unwrap();
                state.lookup(&event_id)?.map(|(event, version)| LedgerSnapshot {
                    event,
                    version,
                    existing: selector.as_ref().and_then(|s| state.select(s)),
                })
            };

            if let Some(barrier) = self.take_gate() {
                barrier.wait().await;
            }

            let held = self.hold.lock().unwrap().take();
            if let Some(held) = held {
                let _ = held.reached.send(());
                let _ = held.release.await;
            }

            Ok(snapshot)
        })
    }

    fn commit(&self, write: LedgerWrite) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            if !write.mutation.requires_write() {
                return Ok(write.expected_version);
            }

            let mut state = self.state.lock().unwrap();

            if let Some(error) = state.commit_failure.take() {
                return Err(error);
            }

            let Some((_, actual)) = state.events.get(&write.event_id) else {
                return Err(StoreError::EventNotFound(write.event_id));
            };
            let actual = *actual;

            if actual != write.expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    event_id: write.event_id,
                    expected: write.expected_version,
                    actual,
                });
            }

            if state.pending_conflicts > 0 {
                state.pending_conflicts -= 1;
                return Err(StoreError::ConcurrencyConflict {
                    event_id: write.event_id,
                    expected: write.expected_version,
                    actual: actual.next(),
                });
            }

            // `apply` checks before it mutates, so an error leaves the RSVPs
            // untouched and the counter is only written afterwards.
            state.apply(write.mutation)?;

            let new_version = actual.next();
            if let Some((event, version)) = state.events.get_mut(&write.event_id) {
                event.current_participants = write.participants_after;
                *version = new_version;
            }
            state.applied_commits += 1;
            Ok(new_version)
        })
    }

    fn rsvps_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<RsvpRecord>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if state.failing_events.contains(&event_id) {
                return Err(StoreError::Database(format!(
                    "injected lookup failure for {event_id}"
                )));
            }
            Ok(state
                .rsvps
                .values()
                .filter(|r| r.event_id == event_id)
                .cloned()
                .collect())
        })
    }

    fn rsvps_for_submitter(&self, submitter_id: SubmitterId) -> StoreFuture<'_, Vec<RsvpRecord>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .rsvps
                .values()
                .filter(|r| r.submitter_id == submitter_id)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::fixtures::{family, rsvp_record};
    use crate::mocks::test_clock;
    use pack_rsvp_core::environment::Clock;
    use pack_rsvp_core::model::Capacity;

    fn seeded() -> (InMemoryLedgerStore, EventId) {
        let store = InMemoryLedgerStore::new();
        let id = EventId::new("e-1");
        store.insert_event(Event::new(id.clone(), "Campout", Capacity::new(4)));
        (store, id)
    }

    fn create_write(event_id: &EventId, version: Version, attendees: usize) -> LedgerWrite {
        let record = rsvp_record("r-1", event_id.as_str(), "u-1", family(attendees));
        LedgerWrite {
            event_id: event_id.clone(),
            expected_version: version,
            participants_after: record.attendee_count(),
            delta: i64::from(record.attendee_count()),
            mutation: RsvpMutation::Create(record),
            at: test_clock().now(),
        }
    }

    #[tokio::test]
    async fn commit_writes_record_and_counter_together() {
        let (store, id) = seeded();
        let version = store.version_of(&id).expect("seeded");

        let new_version = store.commit(create_write(&id, version, 3)).await.unwrap();

        assert_eq!(new_version, version.next());
        assert_eq!(store.event(&id).map(|e| e.current_participants), Some(3));
        assert_eq!(store.attendee_sum(&id), 3);
        assert_eq!(store.applied_commits(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_writes_nothing() {
        let (store, id) = seeded();
        let version = store.version_of(&id).expect("seeded");
        store.set_participants(&id, 1);

        let err = store.commit(create_write(&id, version, 2)).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.event(&id).map(|e| e.current_participants), Some(1));
        assert!(store.rsvps_of(&id).is_empty());
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let (store, id) = seeded();
        let version = store.version_of(&id).expect("seeded");
        store.inject_conflicts(1);

        assert!(store.commit(create_write(&id, version, 1)).await.unwrap_err().is_conflict());
        assert!(store.commit(create_write(&id, version, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_event_is_reported() {
        let (store, id) = seeded();
        let version = store.version_of(&id).expect("seeded");
        store.delete_event(&id);

        let err = store.commit(create_write(&id, version, 1)).await.unwrap_err();
        assert_eq!(err, StoreError::EventNotFound(id.clone()));
        assert!(store.rsvps_of(&id).is_empty());
    }

    #[tokio::test]
    async fn failed_mutation_rolls_back() {
        let (store, id) = seeded();
        let existing = rsvp_record("r-1", "e-1", "u-1", family(1));
        store.insert_rsvp_raw(existing);
        let version = store.version_of(&id).expect("seeded");

        // Same family key already present
        let err = store.commit(create_write(&id, version, 2)).await.unwrap_err();

        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(store.event(&id).map(|e| e.current_participants), Some(0));
        assert_eq!(store.version_of(&id), Some(version));
        assert_eq!(store.rsvps_of(&id).len(), 1);
    }

    #[tokio::test]
    async fn snapshot_includes_selected_rsvp() {
        let (store, id) = seeded();
        let record = rsvp_record("r-7", "e-1", "u-7", family(2));
        let key = record.idempotency_key();
        store.insert_rsvp_raw(record.clone());

        let snapshot = store
            .load_snapshot(id.clone(), Some(RsvpSelector::Key(key)))
            .await
            .unwrap()
            .expect("event exists");

        assert_eq!(snapshot.existing, Some(record));
        assert_eq!(snapshot.version, store.version_of(&id).expect("seeded"));
    }

    #[tokio::test]
    async fn failing_lookup_poisons_batch_reads() {
        let (store, id) = seeded();
        store.fail_lookups_for(id.clone());

        assert!(store.get_event(id.clone()).await.is_err());
        assert!(store.get_events(vec![id]).await.is_err());
    }

    #[tokio::test]
    async fn unchanged_commit_writes_nothing() {
        let (store, id) = seeded();
        let version = store.version_of(&id).expect("seeded");
        let record = rsvp_record("r-1", "e-1", "u-1", family(1));

        let result = store
            .commit(LedgerWrite {
                event_id: id.clone(),
                expected_version: version,
                participants_after: 0,
                delta: 0,
                mutation: RsvpMutation::Unchanged(record),
                at: test_clock().now(),
            })
            .await
            .unwrap();

        assert_eq!(result, version);
        assert_eq!(store.applied_commits(), 0);
    }

    #[tokio::test]
    async fn cancel_frees_the_family_key() {
        let (store, id) = seeded();
        let record = rsvp_record("r-1", "e-1", "u-1", family(2));
        store.insert_rsvp_raw(record.clone());
        store.set_participants(&id, 2);
        let version = store.version_of(&id).expect("seeded");

        store
            .commit(LedgerWrite {
                event_id: id.clone(),
                expected_version: version,
                participants_after: 0,
                delta: -2,
                mutation: RsvpMutation::Cancel(record.clone()),
                at: test_clock().now(),
            })
            .await
            .unwrap();

        let again = store
            .find_rsvp(RsvpSelector::Key(record.idempotency_key()))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.event(&id).map(|e| e.current_participants), Some(0));
    }

    #[tokio::test]
    async fn paused_snapshots_see_the_same_state() {
        let (store, id) = seeded();
        store.pause_after_snapshot(2);

        let (a, b) = tokio::join!(
            store.load_snapshot(id.clone(), None),
            store.load_snapshot(id.clone(), None),
        );

        let a = a.unwrap().expect("event exists");
        let b = b.unwrap().expect("event exists");
        assert_eq!(a.version, b.version);

        // Gate is spent; a third read passes straight through.
        assert!(store.load_snapshot(id, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn held_snapshot_waits_for_release() {
        let (store, id) = seeded();
        let mut hold = store.hold_next_snapshot();

        let reader = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.load_snapshot(id, None).await })
        };
        hold.reached().await;
        store.delete_event(&id);
        hold.release();

        // The held read saw the event; the store no longer has it.
        assert!(reader.await.unwrap().unwrap().is_some());
        assert!(store.event(&id).is_none());
    }

    #[tokio::test]
    async fn submitter_index_spans_events() {
        let store = InMemoryLedgerStore::new();
        store.insert_rsvp_raw(rsvp_record("r-1", "e-1", "u-1", family(1)));
        store.insert_rsvp_raw(rsvp_record("r-2", "e-2", "u-1", family(2)));
        store.insert_rsvp_raw(rsvp_record("r-3", "e-2", "u-2", family(3)));

        let mine = store
            .rsvps_for_submitter(SubmitterId::new("u-1"))
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
    }
}
