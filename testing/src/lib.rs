//! # Pack RSVP Testing
//!
//! Testing utilities for the RSVP capacity-commit subsystem.
//!
//! This crate provides:
//! - Mock implementations of environment traits and audit sinks
//! - [`InMemoryLedgerStore`] with fault injection
//! - Fixtures for events, attendees and records
//! - proptest strategies for attendee lists
//! - [`DecisionTest`], a Given-When-Then harness for decisions
//!
//! ## Example
//!
//! ```ignore
//! use pack_rsvp_testing::{InMemoryLedgerStore, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn test_submit() {
//!     let store = InMemoryLedgerStore::new();
//!     store.insert_event(fixtures::event("campout", Some(10)));
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use pack_rsvp_core::environment::{Clock, IdGenerator};

pub mod in_memory_store;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use pack_rsvp_core::audit::{AuditEntry, AuditError, AuditSink};
    use pack_rsvp_core::model::RsvpId;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use pack_rsvp_testing::mocks::FixedClock;
    /// use pack_rsvp_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable ids: `rsvp-1`, `rsvp-2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start at `rsvp-1`.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_rsvp_id(&self) -> RsvpId {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            RsvpId::new(format!("rsvp-{n}"))
        }
    }

    /// Audit sink that keeps every entry for later assertions.
    ///
    /// Delivery happens on a spawned task, so tests that expect facts should
    /// use [`RecordingAuditSink::wait_for`] rather than read
    /// [`RecordingAuditSink::entries`] right after a commit.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingAuditSink {
        entries: Arc<Mutex<Vec<AuditEntry>>>,
        delay: Option<Duration>,
    }

    impl RecordingAuditSink {
        /// Create an empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A sink that sleeps for `delay` before recording each entry.
        #[must_use]
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        /// Wait until at least `n` entries arrived, or two seconds passed.
        /// Returns whatever was recorded by then.
        pub async fn wait_for(&self, n: usize) -> Vec<AuditEntry> {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            loop {
                let entries = self.entries();
                if entries.len() >= n || tokio::time::Instant::now() >= deadline {
                    return entries;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        /// Entries recorded so far, in delivery order.
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned.
        #[must_use]
        #[allow(clippy::unwrap_used)]
        pub fn entries(&self) -> Vec<AuditEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl AuditSink for RecordingAuditSink {
        #[allow(clippy::unwrap_used)]
        fn record(
            &self,
            entry: AuditEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.entries.lock().unwrap().push(entry);
                Ok(())
            })
        }
    }

    /// Audit sink that always fails.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingAuditSink;

    impl AuditSink for FailingAuditSink {
        fn record(
            &self,
            _entry: AuditEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(async { Err(AuditError::Sink("audit log offline".to_string())) })
        }
    }

    /// Audit sink that never completes, for delivery timeouts.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HangingAuditSink;

    impl AuditSink for HangingAuditSink {
        fn record(
            &self,
            _entry: AuditEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }
}

/// Test data builders.
pub mod fixtures {
    use super::mocks::test_clock;
    use pack_rsvp_core::environment::Clock;
    use pack_rsvp_core::model::{
        Attendee, Capacity, ContactFields, Event, EventId, RsvpId, RsvpRecord, SubmitterId,
    };
    use pack_rsvp_core::store::LedgerSnapshot;
    use pack_rsvp_core::version::Version;

    /// Active event with the given capacity (`None` or `Some(0)` is unlimited).
    #[must_use]
    pub fn event(id: &str, capacity: Option<u32>) -> Event {
        Event::new(
            EventId::new(id),
            format!("Event {id}"),
            capacity.and_then(Capacity::new),
        )
    }

    /// `n` attendees named `Scout 1` .. `Scout n`.
    #[must_use]
    pub fn family(n: usize) -> Vec<Attendee> {
        (1..=n).map(|i| Attendee::named(format!("Scout {i}"))).collect()
    }

    /// Minimal valid contact details for a family.
    #[must_use]
    pub fn contact(family_name: &str) -> ContactFields {
        ContactFields {
            family_name: family_name.to_string(),
            email: format!("{}@example.org", family_name.to_lowercase()),
            ..ContactFields::default()
        }
    }

    /// Committed record keyed by family, stamped with the test clock.
    #[must_use]
    pub fn rsvp_record(
        id: &str,
        event_id: &str,
        submitter_id: &str,
        attendees: Vec<Attendee>,
    ) -> RsvpRecord {
        RsvpRecord::new(
            RsvpId::new(id),
            EventId::new(event_id),
            SubmitterId::new(submitter_id),
            None,
            attendees,
            contact("Smith"),
            test_clock().now(),
        )
    }

    /// Snapshot of `event` at `version`.
    #[must_use]
    pub const fn snapshot(
        event: Event,
        version: Version,
        existing: Option<RsvpRecord>,
    ) -> LedgerSnapshot {
        LedgerSnapshot {
            event,
            version,
            existing,
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use pack_rsvp_core::model::Attendee;
    use proptest::prelude::*;

    /// A single attendee with a non-blank name.
    pub fn attendee() -> impl Strategy<Value = Attendee> {
        ("[A-Z][a-z]{1,8}", proptest::option::of(0u8..=90), any::<bool>()).prop_map(
            |(name, age, is_adult)| Attendee {
                name,
                age,
                den: None,
                is_adult,
            },
        )
    }

    /// Non-empty attendee lists of at most `max` entries.
    pub fn attendees(max: usize) -> impl Strategy<Value = Vec<Attendee>> {
        proptest::collection::vec(attendee(), 1..=max.max(1))
    }
}

// Re-export commonly used items
pub use decision_test::DecisionTest;
pub use in_memory_store::{InMemoryLedgerStore, SnapshotHold};
pub use mocks::{
    FailingAuditSink, FixedClock, HangingAuditSink, RecordingAuditSink, SequentialIdGenerator,
    test_clock,
};
