//! Audit facts handed to the audit-log collaborator.
//!
//! Every successful ledger commit produces one [`AuditEntry`]. Delivery is
//! best-effort: the commit has already happened, so a failing sink never
//! rolls anything back.

use crate::model::{EventId, RsvpId, SubmitterId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// What happened to the RSVP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A new RSVP was recorded
    RsvpRecorded,
    /// An existing RSVP was amended
    RsvpAmended,
    /// An RSVP was cancelled
    RsvpCancelled,
    /// The ledger counter was repaired
    LedgerRepaired,
}

impl AuditKind {
    /// Stable string form, used for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RsvpRecorded => "rsvp_recorded",
            Self::RsvpAmended => "rsvp_amended",
            Self::RsvpCancelled => "rsvp_cancelled",
            Self::LedgerRepaired => "ledger_repaired",
        }
    }
}

/// An "RSVP recorded" (or amended/cancelled) fact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// What happened
    pub kind: AuditKind,
    /// Event whose ledger changed
    pub event_id: EventId,
    /// RSVP involved, if any
    pub rsvp_id: Option<RsvpId>,
    /// Owning family, if any
    pub submitter_id: Option<SubmitterId>,
    /// Attendees on the RSVP after the change
    pub attendee_count: u32,
    /// Signed change applied to the ledger
    pub delta: i64,
    /// Who asked for the change (submitter or administrator id)
    pub actor: String,
    /// Commit time
    pub at: DateTime<Utc>,
}

/// Errors from audit delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The collaborator rejected or failed to store the fact.
    #[error("Audit sink failed: {0}")]
    Sink(String),

    /// Delivery did not finish in time.
    #[error("Audit delivery timed out after {0} ms")]
    Timeout(u64),
}

/// Receiver of audit facts.
pub trait AuditSink: Send + Sync {
    /// Record one fact.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sink`] if the fact could not be stored.
    fn record(
        &self,
        entry: AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>>;
}

/// Writes audit facts to the structured log.
///
/// Used when no audit-log collaborator is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(
        &self,
        entry: AuditEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                kind = entry.kind.as_str(),
                event_id = %entry.event_id,
                rsvp_id = entry.rsvp_id.as_ref().map(RsvpId::as_str),
                attendee_count = entry.attendee_count,
                delta = entry.delta,
                actor = %entry.actor,
                "audit"
            );
            Ok(())
        })
    }
}
