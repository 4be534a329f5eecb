//! RSVP submission and cancellation.
//!
//! [`RsvpService`] is the command surface. It wires validation, the commit
//! loop and audit delivery together:
//!
//! ```text
//! submit:  validate -> precheck (read-only) -> run_atomic(SubmitDecision) -> spawn audit
//! cancel:  find RSVP -> run_atomic(CancelDecision) -> spawn audit
//! ```
//!
//! Only `run_atomic` writes. Everything before it is advisory; everything
//! after it observes a commit that has already happened.

use crate::audit::AuditDispatcher;
use crate::commit::{
    CancelDecision, CancelRequest, CommitEnvironment, CommitReceipt, Committed, Requester,
    SubmitDecision, run_atomic,
};
use crate::config::Config;
use crate::error::RsvpError;
use crate::idempotency;
use crate::submission::Submission;
use crate::validator::{self, SubmissionLimits};
use pack_rsvp_core::audit::AuditSink;
use pack_rsvp_core::model::{RsvpId, SubmitterId};
use pack_rsvp_core::store::{LedgerStore, RsvpSelector};
use pack_rsvp_runtime::retry::RetryPolicy;
use std::sync::Arc;

/// Command surface of the RSVP subsystem.
///
/// Cheap to clone; clones share the store and the audit sink.
#[derive(Clone)]
pub struct RsvpService {
    store: Arc<dyn LedgerStore>,
    audit: AuditDispatcher,
    env: CommitEnvironment,
    retry: RetryPolicy,
    limits: SubmissionLimits,
}

impl std::fmt::Debug for RsvpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsvpService")
            .field("retry", &self.retry)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RsvpService {
    /// Service over `store` with defaults: log audit sink, system clock,
    /// UUID ids, default retry policy and limits.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            audit: AuditDispatcher::default(),
            env: CommitEnvironment::system(),
            retry: RetryPolicy::default(),
            limits: SubmissionLimits::default(),
        }
    }

    /// Service configured from `config`.
    #[must_use]
    pub fn from_config(
        store: Arc<dyn LedgerStore>,
        sink: Arc<dyn AuditSink>,
        config: &Config,
    ) -> Self {
        Self::new(store)
            .with_audit(AuditDispatcher::new(sink, config.audit.timeout()))
            .with_retry(RetryPolicy::from(&config.commit))
            .with_limits(SubmissionLimits::from(&config.limits))
    }

    /// Replace the audit dispatcher.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    /// Replace the clock and id generator.
    #[must_use]
    pub fn with_environment(mut self, env: CommitEnvironment) -> Self {
        self.env = env;
        self
    }

    /// Replace the commit retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the submission limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: SubmissionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The ledger store.
    #[must_use]
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// The audit dispatcher.
    #[must_use]
    pub const fn audit(&self) -> &AuditDispatcher {
        &self.audit
    }

    /// The decision environment.
    #[must_use]
    pub const fn environment(&self) -> &CommitEnvironment {
        &self.env
    }

    /// The commit retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Record or amend the RSVP of `submitter_id`.
    ///
    /// Resubmitting the same content under the same key returns the same
    /// receipt (disposition `Unchanged`) without writing.
    ///
    /// # Errors
    ///
    /// - [`RsvpError::InvalidInput`] for malformed input
    /// - [`RsvpError::EventNotFound`] if the event is missing or inactive
    /// - [`RsvpError::RsvpNotFound`] if an explicit RSVP id matches nothing
    /// - [`RsvpError::CapacityExceeded`] with the remaining spots
    /// - [`RsvpError::TemporarilyUnavailable`] on storage failure or
    ///   persistent contention
    #[tracing::instrument(
        name = "rsvp_submit",
        skip_all,
        fields(event_id = %submission.event_id, submitter_id = %submitter_id)
    )]
    pub async fn submit(
        &self,
        submitter_id: SubmitterId,
        submission: Submission,
    ) -> Result<CommitReceipt, RsvpError> {
        let actor = submitter_id.to_string();

        let validated = validator::validate(submission, submitter_id, &self.limits)
            .inspect_err(|e| tracing::debug!(error = %e, "Submission rejected"))?;

        validator::precheck(self.store.as_ref(), &validated).await?;

        let selector = idempotency::selector_for(&validated);
        let committed = run_atomic(
            self.store.as_ref(),
            &self.retry,
            &validated.event_id,
            Some(&selector),
            &SubmitDecision,
            &validated,
            &self.env,
        )
        .await?;

        self.finish(committed, &actor)
    }

    /// Remove an RSVP and release its spots.
    ///
    /// # Errors
    ///
    /// - [`RsvpError::RsvpNotFound`] if the RSVP does not exist
    /// - [`RsvpError::PermissionDenied`] if a submitter cancels someone else's
    ///   RSVP
    /// - [`RsvpError::EventNotFound`] if the event document is gone
    /// - [`RsvpError::TemporarilyUnavailable`] on storage failure or
    ///   persistent contention
    #[tracing::instrument(
        name = "rsvp_cancel",
        skip_all,
        fields(rsvp_id = %rsvp_id, actor = %requester.actor())
    )]
    pub async fn cancel(
        &self,
        rsvp_id: RsvpId,
        requester: Requester,
    ) -> Result<CommitReceipt, RsvpError> {
        let selector = RsvpSelector::Id(rsvp_id.clone());
        let Some(record) = self.store.find_rsvp(selector.clone()).await? else {
            return Err(RsvpError::RsvpNotFound(rsvp_id));
        };

        let actor = requester.actor();
        let request = CancelRequest { rsvp_id, requester };
        let committed = run_atomic(
            self.store.as_ref(),
            &self.retry,
            &record.event_id,
            Some(&selector),
            &CancelDecision,
            &request,
            &self.env,
        )
        .await?;

        self.finish(committed, &actor)
    }

    fn finish(&self, committed: Committed, actor: &str) -> Result<CommitReceipt, RsvpError> {
        let receipt = committed
            .receipt()
            .ok_or_else(|| RsvpError::TemporarilyUnavailable {
                reason: "commit produced no RSVP".to_string(),
            })?;

        tracing::info!(
            rsvp_id = %receipt.rsvp_id,
            disposition = receipt.disposition.as_str(),
            delta = receipt.delta,
            new_participant_total = receipt.new_participant_total,
            attempts = receipt.attempts,
            "RSVP committed"
        );

        // Spawned; outlives this future.
        self.audit.deliver_for(&committed.write, actor);
        Ok(receipt)
    }
}
