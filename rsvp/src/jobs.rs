//! Batch jobs: legacy backfill and ledger reconciliation.
//!
//! Both go through the same commit path as interactive requests. The
//! backfill replays legacy entries as ordinary submissions; reconciliation
//! overwrites a drifted counter with a version-checked write.

use crate::commit::{AttemptError, Disposition, ReconcileDecision, RosterTotal, finish};
use crate::error::RsvpError;
use crate::service::RsvpService;
use crate::submission::Submission;
use pack_rsvp_core::decision::Decision;
use pack_rsvp_core::model::{Attendee, ContactFields, EventId, SubmitterId};
use pack_rsvp_core::store::StoreError;
use pack_rsvp_runtime::retry::retry_with_predicate;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Actor recorded on reconciliation audit facts.
pub const RECONCILE_ACTOR: &str = "reconcile";

// ============================================================================
// Backfill
// ============================================================================

/// An RSVP exported from the legacy store.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRsvp {
    /// Legacy document id
    pub id: String,
    /// Event the RSVP is for
    pub event_id: String,
    /// Authenticated owner, when the legacy entry had one
    #[serde(default)]
    pub user_id: Option<String>,
    /// Family name
    #[serde(default)]
    pub family_name: Option<String>,
    /// Older exports carry the family name here
    #[serde(default)]
    pub contact_name: Option<String>,
    /// Contact email
    #[serde(default)]
    pub email: Option<String>,
    /// Older exports carry the email here
    #[serde(default)]
    pub contact_email: Option<String>,
    /// Phone
    #[serde(default)]
    pub phone: Option<String>,
    /// Attendees
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Dietary restrictions
    #[serde(default)]
    pub dietary_restrictions: Option<String>,
    /// Special needs
    #[serde(default)]
    pub special_needs: Option<String>,
    /// Notes
    #[serde(default)]
    pub notes: Option<String>,
}

impl LegacyRsvp {
    fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.contact_email.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Owner identity: the legacy user id, else a placeholder derived from the
    /// email, else one derived from the document id.
    #[must_use]
    pub fn submitter_id(&self) -> SubmitterId {
        if let Some(user_id) = self.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return SubmitterId::new(user_id);
        }
        match self.email() {
            Some(email) => SubmitterId::new(format!("legacy:{}", email.to_lowercase())),
            None => SubmitterId::new(format!("legacy:{}", self.id.trim())),
        }
    }

    /// The entry as a submission keyed by its legacy id.
    #[must_use]
    pub fn to_submission(&self) -> Submission {
        let contact = ContactFields {
            family_name: self
                .family_name
                .clone()
                .or_else(|| self.contact_name.clone())
                .unwrap_or_default(),
            email: self.email().unwrap_or_default().to_string(),
            phone: self.phone.clone(),
            dietary_restrictions: self.dietary_restrictions.clone(),
            special_needs: self.special_needs.clone(),
            notes: self.notes.clone(),
        };

        Submission::new(self.event_id.clone(), self.attendees.clone(), contact)
            .with_request_id(format!("legacy:{}", self.id))
    }
}

/// A legacy export: a bare array or `{ "rsvps": [...] }`.
///
/// Entries stay raw JSON until [`LegacyExport::into_entries`], so one
/// malformed entry does not make the whole file unreadable.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum LegacyExport {
    /// Array of entries
    List(Vec<serde_json::Value>),
    /// Backup document
    Backup {
        /// Entries
        rsvps: Vec<serde_json::Value>,
    },
}

/// One entry of an export: parsed, or rejected before replay.
pub type LegacyEntry = Result<LegacyRsvp, Rejection>;

impl LegacyExport {
    /// The entries, in file order, each parsed on its own.
    ///
    /// An entry that does not have the legacy shape becomes an
    /// `invalid_input` [`Rejection`], keyed by its `id` when it has one and
    /// by its position otherwise.
    #[must_use]
    pub fn into_entries(self) -> Vec<LegacyEntry> {
        let raw = match self {
            Self::List(entries) | Self::Backup { rsvps: entries } => entries,
        };

        raw.into_iter()
            .enumerate()
            .map(|(index, value)| {
                let legacy_id = value
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| format!("#{index}"), str::to_string);

                serde_json::from_value::<LegacyRsvp>(value).map_err(|error| Rejection {
                    legacy_id,
                    error_kind: "invalid_input",
                    message: format!("Malformed legacy entry: {error}"),
                })
            })
            .collect()
    }
}

/// An entry the backfill could not replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Legacy document id
    pub legacy_id: String,
    /// Machine-readable error kind
    pub error_kind: &'static str,
    /// Human-readable reason
    pub message: String,
}

/// Outcome of a backfill run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    /// Entries replayed for the first time
    pub created: usize,
    /// Entries whose stored RSVP was amended
    pub amended: usize,
    /// Entries already present with identical content
    pub unchanged: usize,
    /// Entries that failed
    pub rejected: Vec<Rejection>,
}

impl BackfillReport {
    /// Entries processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.amended + self.unchanged + self.rejected.len()
    }
}

/// Replays legacy RSVPs through [`RsvpService::submit`].
///
/// The legacy id becomes the request id, so running the job twice over the
/// same export leaves the ledger as it was after the first run.
#[derive(Clone, Debug)]
pub struct BackfillJob {
    service: RsvpService,
}

impl BackfillJob {
    /// Job submitting through `service`.
    #[must_use]
    pub const fn new(service: RsvpService) -> Self {
        Self { service }
    }

    /// Replay `entries` one at a time, in order.
    #[tracing::instrument(name = "rsvp_backfill", skip_all, fields(entries = entries.len()))]
    pub async fn run(&self, entries: &[LegacyRsvp]) -> BackfillReport {
        let mut report = BackfillReport::default();
        for entry in entries {
            self.replay(entry, &mut report).await;
        }
        finished(&report);
        report
    }

    /// Replay a whole export in file order. Malformed entries are reported
    /// as rejected and do not stop the run.
    #[tracing::instrument(name = "rsvp_backfill", skip_all)]
    pub async fn run_export(&self, export: LegacyExport) -> BackfillReport {
        let mut report = BackfillReport::default();
        for entry in export.into_entries() {
            match entry {
                Ok(entry) => self.replay(&entry, &mut report).await,
                Err(rejection) => {
                    tracing::warn!(
                        legacy_id = %rejection.legacy_id,
                        error = %rejection.message,
                        "Legacy RSVP unreadable"
                    );
                    report.rejected.push(rejection);
                }
            }
        }
        finished(&report);
        report
    }

    async fn replay(&self, entry: &LegacyRsvp, report: &mut BackfillReport) {
        let outcome = self
            .service
            .submit(entry.submitter_id(), entry.to_submission())
            .await;

        match outcome {
            Ok(receipt) => match receipt.disposition {
                Disposition::Created => report.created += 1,
                Disposition::Amended => report.amended += 1,
                Disposition::Unchanged | Disposition::Cancelled => report.unchanged += 1,
            },
            Err(error) => {
                tracing::warn!(legacy_id = %entry.id, error = %error, "Legacy RSVP rejected");
                report.rejected.push(Rejection {
                    legacy_id: entry.id.clone(),
                    error_kind: error.kind(),
                    message: error.to_string(),
                });
            }
        }
    }
}

fn finished(report: &BackfillReport) {
    tracing::info!(
        created = report.created,
        amended = report.amended,
        unchanged = report.unchanged,
        rejected = report.rejected.len(),
        "Backfill finished"
    );
}

// ============================================================================
// Reconcile
// ============================================================================

/// Outcome of [`reconcile`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// The event
    pub event_id: EventId,
    /// Counter before the repair
    pub previous_total: u32,
    /// Sum of committed attendee counts
    pub recomputed_total: u32,
    /// Change written (0 when the ledger was already right)
    pub delta: i64,
    /// Whether a write happened
    pub repaired: bool,
    /// Attempts used
    pub attempts: u32,
}

/// Recompute an event's counter from its committed RSVPs and write it back.
///
/// The roster is read between two reads of the event document; the attempt
/// proceeds only if both saw the same version, and the write is conditioned on
/// that version. Any commit in between sends the attempt around again.
///
/// # Errors
///
/// - [`RsvpError::EventNotFound`] if the event does not exist
/// - [`RsvpError::CapacityExceeded`] if the recomputed total is above the cap;
///   nothing is written
/// - [`RsvpError::TemporarilyUnavailable`] on storage failure or persistent
///   contention
#[tracing::instrument(name = "rsvp_reconcile", skip_all, fields(event_id = %event_id))]
pub async fn reconcile(
    service: &RsvpService,
    event_id: &EventId,
) -> Result<ReconcileReport, RsvpError> {
    let store = service.store();
    let env = service.environment();
    let started = Instant::now();
    let mut attempts = 0;
    let mut previous_total = 0;

    let outcome = retry_with_predicate(
        service.retry_policy(),
        |attempt| {
            attempts = attempt + 1;
            async move {
                let missing = || AttemptError::Rejected(RsvpError::EventNotFound(event_id.clone()));

                let before = store.get_event(event_id.clone()).await?.ok_or_else(missing)?;
                let attendee_sum: u64 = store
                    .rsvps_for_event(event_id.clone())
                    .await?
                    .iter()
                    .map(|r| u64::from(r.attendee_count()))
                    .sum();
                let snapshot = store
                    .load_snapshot(event_id.clone(), None)
                    .await?
                    .ok_or_else(missing)?;

                if snapshot.version != before.version {
                    return Err(AttemptError::from(StoreError::ConcurrencyConflict {
                        event_id: event_id.clone(),
                        expected: before.version,
                        actual: snapshot.version,
                    }));
                }

                let write = ReconcileDecision
                    .decide(&snapshot, &RosterTotal { attendee_sum }, env)
                    .map_err(AttemptError::Rejected)?;
                let previous = snapshot.event.current_participants;

                if write.delta == 0 {
                    return Ok(((write, snapshot.version), previous));
                }
                let version = store.commit(write.clone()).await?;
                Ok::<_, AttemptError>(((write, version), previous))
            }
        },
        AttemptError::is_conflict,
    )
    .await
    .map(|(committed, previous)| {
        previous_total = previous;
        committed
    });

    let committed = finish(event_id, outcome, attempts, started)?;
    let repaired = committed.write.delta != 0;

    if repaired {
        tracing::warn!(
            previous_total,
            recomputed_total = committed.write.participants_after,
            delta = committed.write.delta,
            "Ledger repaired"
        );
        service.audit().deliver_for(&committed.write, RECONCILE_ACTOR);
    }

    Ok(ReconcileReport {
        event_id: event_id.clone(),
        previous_total,
        recomputed_total: committed.write.participants_after,
        delta: committed.write.delta,
        repaired,
        attempts: committed.attempts,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn parsed(json: &str) -> Vec<LegacyRsvp> {
        serde_json::from_str::<LegacyExport>(json)
            .unwrap()
            .into_entries()
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn legacy_entries_map_old_field_names() {
        let json = r#"[{
            "id": "doc-7",
            "eventId": "campout",
            "contactName": "Rivera",
            "contactEmail": " Rivera@Example.org ",
            "attendees": [{"name": "Ana", "isAdult": false}]
        }]"#;

        let entries = parsed(json);
        let entry = &entries[0];

        assert_eq!(entry.submitter_id(), SubmitterId::new("legacy:rivera@example.org"));
        let submission = entry.to_submission();
        assert_eq!(submission.contact.family_name, "Rivera");
        assert_eq!(submission.contact.email, "Rivera@Example.org");
        assert_eq!(submission.request_id.as_deref(), Some("legacy:doc-7"));
    }

    #[test]
    fn backup_documents_are_accepted() {
        let json = r#"{"timestamp": "2025-01-01", "rsvps": [
            {"id": "a", "eventId": "e", "userId": "u-1", "familyName": "Lee", "email": "lee@example.org"}
        ]}"#;

        let entries = parsed(json);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].submitter_id(), SubmitterId::new("u-1"));
    }

    #[test]
    fn entries_without_email_fall_back_to_document_id() {
        let entry = LegacyRsvp {
            id: "doc-9".into(),
            event_id: "e".into(),
            user_id: Some("  ".into()),
            family_name: None,
            contact_name: None,
            email: None,
            contact_email: None,
            phone: None,
            attendees: Vec::new(),
            dietary_restrictions: None,
            special_needs: None,
            notes: None,
        };
        assert_eq!(entry.submitter_id(), SubmitterId::new("legacy:doc-9"));
    }

    #[test]
    fn malformed_entries_are_rejected_one_by_one() {
        let json = r#"[
            {"id": "good", "eventId": "e", "familyName": "Lee", "email": "lee@example.org",
             "attendees": [{"name": "Kim"}]},
            {"id": "count-only", "eventId": "e", "familyName": "Park", "attendees": 3},
            {"eventId": "e", "attendees": [{"age": 7}]},
            {"id": "too-old", "eventId": "e", "attendees": [{"name": "Bo", "age": 300}]}
        ]"#;

        let entries = serde_json::from_str::<LegacyExport>(json).unwrap().into_entries();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].as_ref().unwrap().id, "good");
        let rejected: Vec<&str> = entries
            .iter()
            .filter_map(|e| e.as_ref().err())
            .map(|r| r.legacy_id.as_str())
            .collect();
        assert_eq!(rejected, vec!["count-only", "#2", "too-old"]);
        assert!(
            entries
                .iter()
                .filter_map(|e| e.as_ref().err())
                .all(|r| r.error_kind == "invalid_input")
        );
    }
}
