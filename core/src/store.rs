//! Ledger store trait and related types.
//!
//! The store is the durable home of event documents (with their capacity
//! ledger) and RSVP records. It exposes exactly one write primitive,
//! [`LedgerStore::commit`], which applies an RSVP mutation and the matching
//! counter update as one unit, conditional on the event document still being
//! at the version the caller read.
//!
//! # Implementations
//!
//! - `PostgresLedgerStore` (in `pack-rsvp-postgres`): production implementation
//! - `InMemoryLedgerStore` (in `pack-rsvp-testing`): fast, deterministic testing
//!
//! # Optimistic concurrency
//!
//! ```no_run
//! use pack_rsvp_core::model::EventId;
//! use pack_rsvp_core::store::{LedgerStore, StoreError};
//!
//! async fn example<S: LedgerStore>(store: &S) -> Result<(), StoreError> {
//!     let event_id = EventId::new("campout-2025");
//!
//!     // 1. Read event + counter + version
//!     let Some(snapshot) = store.load_snapshot(event_id, None).await? else {
//!         return Ok(());
//!     };
//!
//!     // 2. Decide what to write against `snapshot.version`, then commit.
//!     //    A concurrent writer makes this fail with `ConcurrencyConflict`.
//!     Ok(())
//! }
//! ```

use crate::model::{Event, EventId, IdempotencyKey, RsvpId, RsvpRecord, SubmitterId, VersionedEvent};
use crate::version::Version;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`LedgerStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the event document was modified by
    /// another commit after it was read.
    #[error("Concurrency conflict on event {event_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Event whose document moved on
        event_id: EventId,
        /// The version the writer read
        expected: Version,
        /// The version currently stored
        actual: Version,
    },

    /// The event document no longer exists.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Database query or connection error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store refused to serve the request (overloaded, shutting down).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this is an optimistic-concurrency conflict (safe to retry).
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// How to find the RSVP a commit may amend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RsvpSelector {
    /// By idempotency key
    Key(IdempotencyKey),
    /// By record id
    Id(RsvpId),
}

/// Point-in-time read of one event's ledger, taken inside the commit loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// The event document
    pub event: Event,
    /// Version of the event document at read time
    pub version: Version,
    /// RSVP matched by the selector, if any
    pub existing: Option<RsvpRecord>,
}

/// What a commit does to the RSVP collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RsvpMutation {
    /// Insert a new record.
    Create(RsvpRecord),
    /// Replace an existing record (same id).
    Amend(RsvpRecord),
    /// Remove the given record.
    Cancel(RsvpRecord),
    /// Nothing to write; the stored record already matches.
    Unchanged(RsvpRecord),
    /// Only the counter changes (ledger repair).
    CounterOnly,
}

impl RsvpMutation {
    /// Whether committing this mutation needs a store write.
    #[must_use]
    pub const fn requires_write(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }

    /// The record involved, if any.
    #[must_use]
    pub const fn record(&self) -> Option<&RsvpRecord> {
        match self {
            Self::Create(r) | Self::Amend(r) | Self::Cancel(r) | Self::Unchanged(r) => Some(r),
            Self::CounterOnly => None,
        }
    }
}

/// A fully decided ledger write.
///
/// Produced by a [`crate::decision::Decision`] from a [`LedgerSnapshot`];
/// applied by [`LedgerStore::commit`] only if the event is still at
/// `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerWrite {
    /// Event whose ledger is written
    pub event_id: EventId,
    /// Version the decision was made against
    pub expected_version: Version,
    /// Counter value after the write
    pub participants_after: u32,
    /// Signed change applied to the counter
    pub delta: i64,
    /// RSVP side of the write
    pub mutation: RsvpMutation,
    /// Commit timestamp
    pub at: DateTime<Utc>,
}

/// Durable storage for events and RSVPs.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single store is shared by every
/// request handler.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so that the
/// store can be held as `Arc<dyn LedgerStore>`.
pub trait LedgerStore: Send + Sync {
    /// Read one event with its version.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<VersionedEvent>>;

    /// Read several events. Unknown ids are simply absent from the result.
    ///
    /// # Errors
    ///
    /// - `Database`: query failed
    fn get_events(&self, event_ids: Vec<EventId>) -> StoreFuture<'_, Vec<VersionedEvent>>;

    /// Find one RSVP.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn find_rsvp(&self, selector: RsvpSelector) -> StoreFuture<'_, Option<RsvpRecord>>;

    /// Read an event document, its version and (optionally) the RSVP matched
    /// by `selector` as one consistent snapshot. `None` if the event does not
    /// exist.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn load_snapshot(
        &self,
        event_id: EventId,
        selector: Option<RsvpSelector>,
    ) -> StoreFuture<'_, Option<LedgerSnapshot>>;

    /// Apply a ledger write atomically.
    ///
    /// Either the RSVP mutation and the new counter value are both persisted
    /// and the event version advances by one, or nothing is written.
    /// `RsvpMutation::Unchanged` writes nothing and returns the expected
    /// version.
    ///
    /// # Returns
    ///
    /// The new version of the event document.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the event is no longer at `expected_version`
    /// - `EventNotFound`: the event was deleted
    /// - `Database` / `Serialization`: the write failed (and was rolled back)
    fn commit(&self, write: LedgerWrite) -> StoreFuture<'_, Version>;

    /// All RSVPs of an event, in no particular order.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn rsvps_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<RsvpRecord>>;

    /// All RSVPs submitted by one family, in no particular order.
    ///
    /// # Errors
    ///
    /// - `Database` / `Serialization`: query or decoding failed
    fn rsvps_for_submitter(&self, submitter_id: SubmitterId) -> StoreFuture<'_, Vec<RsvpRecord>>;
}
