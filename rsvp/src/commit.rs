//! Atomic commit protocol.
//!
//! [`run_atomic`] is the only path that writes an event's ledger. Each attempt:
//!
//! 1. loads a snapshot: event, capacity, counter, version, and the RSVP the
//!    command targets;
//! 2. runs a pure [`Decision`] against it, which either rejects or returns the
//!    exact [`LedgerWrite`];
//! 3. hands the write to [`LedgerStore::commit`], conditional on the snapshot
//!    version.
//!
//! A concurrent writer makes step 3 fail with a conflict; the attempt is then
//! repeated from step 1 with a fresh snapshot, up to the retry policy's
//! bound. Rejections from step 2 are authoritative and never retried, so a
//! capacity rejection always reports the remaining spots of the snapshot the
//! commit would have been written against.

use crate::error::RsvpError;
use crate::idempotency::{self, Resolution};
use crate::ledger;
use crate::submission::ValidatedSubmission;
use pack_rsvp_core::decision::Decision;
use pack_rsvp_core::environment::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use pack_rsvp_core::model::{EventId, RsvpId, RsvpRecord, SubmitterId};
use pack_rsvp_core::store::{
    LedgerSnapshot, LedgerStore, LedgerWrite, RsvpMutation, RsvpSelector, StoreError,
};
use pack_rsvp_core::version::Version;
use pack_rsvp_runtime::metrics::CommitMetrics;
use pack_rsvp_runtime::retry::{RetryPolicy, retry_with_predicate};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Dependencies the decisions need.
#[derive(Clone)]
pub struct CommitEnvironment {
    /// Commit timestamps
    pub clock: Arc<dyn Clock>,
    /// Ids for new records
    pub ids: Arc<dyn IdGenerator>,
}

impl CommitEnvironment {
    /// Environment from explicit parts.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    /// Wall clock and random UUIDs.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(UuidIdGenerator))
    }
}

impl fmt::Debug for CommitEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitEnvironment").finish_non_exhaustive()
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Create or amend the RSVP of a validated submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitDecision;

impl Decision for SubmitDecision {
    type Command = ValidatedSubmission;
    type Environment = CommitEnvironment;
    type Error = RsvpError;

    fn decide(
        &self,
        snapshot: &LedgerSnapshot,
        submission: &ValidatedSubmission,
        env: &CommitEnvironment,
    ) -> Result<LedgerWrite, RsvpError> {
        let event = &snapshot.event;
        if !event.is_active() {
            return Err(RsvpError::EventNotFound(event.id.clone()));
        }

        let at = env.clock.now();
        let (mutation, delta) = match idempotency::resolve(snapshot.existing.as_ref(), submission)? {
            Resolution::Unchanged(record) => (RsvpMutation::Unchanged(record.clone()), 0),
            Resolution::Amend(record) => {
                let delta =
                    ledger::delta_between(record.attendee_count(), submission.attendee_count());
                let amended = record.clone().amend(
                    submission.attendees.clone(),
                    submission.contact.clone(),
                    at,
                );
                (RsvpMutation::Amend(amended), delta)
            }
            Resolution::Fresh => {
                let record = RsvpRecord::new(
                    env.ids.next_rsvp_id(),
                    submission.event_id.clone(),
                    submission.submitter_id.clone(),
                    submission.request_id.clone(),
                    submission.attendees.clone(),
                    submission.contact.clone(),
                    at,
                );
                let delta = i64::from(record.attendee_count());
                (RsvpMutation::Create(record), delta)
            }
        };

        let change = ledger::apply_delta(event, delta)?;

        Ok(LedgerWrite {
            event_id: event.id.clone(),
            expected_version: snapshot.version,
            participants_after: change.participants_after,
            delta: change.applied_delta,
            mutation,
            at,
        })
    }
}

/// Who asks for a cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requester {
    /// The family that owns the RSVP
    Submitter(SubmitterId),
    /// An administrator; the role check happens upstream
    Administrator(String),
}

impl Requester {
    /// Actor string recorded in audit facts.
    #[must_use]
    pub fn actor(&self) -> String {
        match self {
            Self::Submitter(id) => id.to_string(),
            Self::Administrator(id) => format!("admin:{id}"),
        }
    }
}

/// Cancellation command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelRequest {
    /// RSVP to remove
    pub rsvp_id: RsvpId,
    /// Who asks
    pub requester: Requester,
}

/// Remove an RSVP and give its attendees' spots back.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelDecision;

impl Decision for CancelDecision {
    type Command = CancelRequest;
    type Environment = CommitEnvironment;
    type Error = RsvpError;

    fn decide(
        &self,
        snapshot: &LedgerSnapshot,
        request: &CancelRequest,
        env: &CommitEnvironment,
    ) -> Result<LedgerWrite, RsvpError> {
        let Some(record) = snapshot
            .existing
            .as_ref()
            .filter(|r| r.id == request.rsvp_id && r.event_id == snapshot.event.id)
        else {
            return Err(RsvpError::RsvpNotFound(request.rsvp_id.clone()));
        };

        if let Requester::Submitter(submitter_id) = &request.requester {
            if submitter_id != &record.submitter_id {
                return Err(RsvpError::PermissionDenied {
                    rsvp_id: record.id.clone(),
                    requester: request.requester.actor(),
                });
            }
        }

        let change = ledger::apply_delta(&snapshot.event, -i64::from(record.attendee_count()))?;

        Ok(LedgerWrite {
            event_id: snapshot.event.id.clone(),
            expected_version: snapshot.version,
            participants_after: change.participants_after,
            delta: change.applied_delta,
            mutation: RsvpMutation::Cancel(record.clone()),
            at: env.clock.now(),
        })
    }
}

/// Attendee total recomputed from an event's committed RSVPs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RosterTotal {
    /// Sum of `attendee_count` over the roster
    pub attendee_sum: u64,
}

/// Overwrite the counter with a recomputed total.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconcileDecision;

impl Decision for ReconcileDecision {
    type Command = RosterTotal;
    type Environment = CommitEnvironment;
    type Error = RsvpError;

    fn decide(
        &self,
        snapshot: &LedgerSnapshot,
        roster: &RosterTotal,
        env: &CommitEnvironment,
    ) -> Result<LedgerWrite, RsvpError> {
        let change = ledger::repair(&snapshot.event, roster.attendee_sum)?;

        Ok(LedgerWrite {
            event_id: snapshot.event.id.clone(),
            expected_version: snapshot.version,
            participants_after: change.participants_after,
            delta: change.applied_delta,
            mutation: RsvpMutation::CounterOnly,
            at: env.clock.now(),
        })
    }
}

// ============================================================================
// Commit loop
// ============================================================================

/// A write that reached the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed {
    /// What was written
    pub write: LedgerWrite,
    /// Event version after the commit
    pub version: Version,
    /// Attempts used, first try included
    pub attempts: u32,
}

/// What a commit did to the RSVP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// New record
    Created,
    /// Existing record amended by a delta
    Amended,
    /// Retry of a committed submission; nothing written
    Unchanged,
    /// Record removed
    Cancelled,
}

impl Disposition {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Amended => "amended",
            Self::Unchanged => "unchanged",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Successful outcome handed back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    /// The RSVP written (or found unchanged)
    pub rsvp_id: RsvpId,
    /// Event whose ledger was written
    pub event_id: EventId,
    /// Counter after the commit
    pub new_participant_total: u32,
    /// What happened to the RSVP
    pub disposition: Disposition,
    /// Change applied to the counter
    pub delta: i64,
    /// Attempts used
    pub attempts: u32,
}

impl Committed {
    /// Caller-facing receipt; `None` for counter-only writes.
    #[must_use]
    pub fn receipt(&self) -> Option<CommitReceipt> {
        let (record, disposition) = match &self.write.mutation {
            RsvpMutation::Create(r) => (r, Disposition::Created),
            RsvpMutation::Amend(r) => (r, Disposition::Amended),
            RsvpMutation::Unchanged(r) => (r, Disposition::Unchanged),
            RsvpMutation::Cancel(r) => (r, Disposition::Cancelled),
            RsvpMutation::CounterOnly => return None,
        };

        Some(CommitReceipt {
            rsvp_id: record.id.clone(),
            event_id: self.write.event_id.clone(),
            new_participant_total: self.write.participants_after,
            disposition,
            delta: self.write.delta,
            attempts: self.attempts,
        })
    }
}

/// Failure of a single attempt.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// The store refused or failed the read or the write
    Store(StoreError),
    /// The decision rejected the command
    Rejected(RsvpError),
}

impl AttemptError {
    pub(crate) const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => e.fmt(f),
            Self::Rejected(e) => e.fmt(f),
        }
    }
}

impl From<StoreError> for AttemptError {
    fn from(error: StoreError) -> Self {
        if error.is_conflict() {
            CommitMetrics::record_conflict();
        }
        Self::Store(error)
    }
}

impl From<AttemptError> for RsvpError {
    fn from(error: AttemptError) -> Self {
        match error {
            AttemptError::Store(e) => e.into(),
            AttemptError::Rejected(e) => e,
        }
    }
}

const fn outcome_label(write: &LedgerWrite) -> &'static str {
    match &write.mutation {
        RsvpMutation::Create(_) => "created",
        RsvpMutation::Amend(_) => "amended",
        RsvpMutation::Unchanged(_) => "unchanged",
        RsvpMutation::Cancel(_) => "cancelled",
        RsvpMutation::CounterOnly if write.delta == 0 => "unchanged",
        RsvpMutation::CounterOnly => "repaired",
    }
}

/// Record the outcome of a commit loop and turn it into the caller's result.
pub(crate) fn finish(
    event_id: &EventId,
    outcome: Result<(LedgerWrite, Version), AttemptError>,
    attempts: u32,
    started: Instant,
) -> Result<Committed, RsvpError> {
    let elapsed = started.elapsed();

    match outcome {
        Ok((write, version)) => {
            CommitMetrics::record_outcome(outcome_label(&write), attempts, elapsed);
            Ok(Committed {
                write,
                version,
                attempts,
            })
        }
        Err(error) => {
            let exhausted = error.is_conflict();
            let error = RsvpError::from(error);

            if exhausted {
                tracing::error!(
                    event_id = %event_id,
                    attempts,
                    "Commit gave up after repeated concurrent modifications"
                );
            } else if let RsvpError::TemporarilyUnavailable { reason } = &error {
                tracing::error!(event_id = %event_id, attempts, reason = %reason, "Commit failed in storage");
            } else if let RsvpError::CapacityExceeded {
                remaining_spots, ..
            } = &error
            {
                tracing::warn!(event_id = %event_id, remaining_spots, "Commit rejected: capacity");
            }

            CommitMetrics::record_outcome(error.kind(), attempts, elapsed);
            Err(error)
        }
    }
}

/// Run `decision` against a fresh snapshot of `event_id` and commit the result,
/// retrying on optimistic-concurrency conflicts.
///
/// `selector` picks the RSVP loaded into the snapshot.
///
/// # Errors
///
/// - The decision's rejection, as is
/// - [`RsvpError::EventNotFound`] if the event is missing at snapshot or commit
///   time
/// - [`RsvpError::TemporarilyUnavailable`] on storage failure or once the
///   retry budget is spent on conflicts
pub async fn run_atomic<D>(
    store: &dyn LedgerStore,
    policy: &RetryPolicy,
    event_id: &EventId,
    selector: Option<&RsvpSelector>,
    decision: &D,
    command: &D::Command,
    env: &D::Environment,
) -> Result<Committed, RsvpError>
where
    D: Decision<Error = RsvpError>,
{
    let started = Instant::now();
    let mut attempts = 0;

    let outcome = retry_with_predicate(
        policy,
        |attempt| {
            attempts = attempt + 1;
            let selector = selector.cloned();
            async move {
                let snapshot = store
                    .load_snapshot(event_id.clone(), selector)
                    .await?
                    .ok_or_else(|| {
                        AttemptError::Rejected(RsvpError::EventNotFound(event_id.clone()))
                    })?;

                let write = decision
                    .decide(&snapshot, command, env)
                    .map_err(AttemptError::Rejected)?;

                let version = store.commit(write.clone()).await?;
                Ok::<_, AttemptError>((write, version))
            }
        },
        AttemptError::is_conflict,
    )
    .await;

    finish(event_id, outcome, attempts, started)
}
