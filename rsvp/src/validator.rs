//! Submission validation.
//!
//! Two layers:
//!
//! - [`validate`] is pure: it parses ids, normalizes free text and bounds the
//!   attendee list.
//! - [`precheck`] takes one point-in-time read of the event (and of the RSVP
//!   the submission would amend) to reject missing or inactive events and
//!   obviously full ones early. It writes nothing. Its capacity verdict is
//!   advisory; the commit re-checks against a fresh snapshot.

use crate::error::RsvpError;
use crate::idempotency;
use crate::ledger;
use crate::submission::{Submission, ValidatedSubmission};
use pack_rsvp_core::model::{Attendee, ContactFields, EventId, RequestId, RsvpId, SubmitterId};
use pack_rsvp_core::store::LedgerStore;

/// Input bounds applied by [`validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionLimits {
    /// Most attendees one RSVP may carry
    pub max_attendees: usize,
    /// Free-text fields are cut to this many characters
    pub max_text_length: usize,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_attendees: 20,
            max_text_length: 1000,
        }
    }
}

/// Strip HTML tags, trim, and cut to `max_chars` characters.
///
/// A `<` without a closing `>` is kept as text.
///
/// ```
/// use pack_rsvp::validator::sanitize_text;
///
/// assert_eq!(sanitize_text("  <b>Nuts</b> & dairy ", 100), "Nuts & dairy");
/// assert_eq!(sanitize_text("a < b", 100), "a < b");
/// assert_eq!(sanitize_text("abcdef", 3), "abc");
/// ```
#[must_use]
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);

    out.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn optional_text(input: Option<&str>, max_chars: usize) -> Option<String> {
    input
        .map(|s| sanitize_text(s, max_chars))
        .filter(|s| !s.is_empty())
}

fn required_text(
    field: &'static str,
    input: &str,
    max_chars: usize,
) -> Result<String, RsvpError> {
    let cleaned = sanitize_text(input, max_chars);
    if cleaned.is_empty() {
        return Err(RsvpError::invalid(field, "is required"));
    }
    Ok(cleaned)
}

fn optional_id<T: std::str::FromStr>(input: Option<&str>) -> Option<T> {
    input.and_then(|s| s.parse().ok())
}

/// Check the shape of a submission and normalize it.
///
/// # Errors
///
/// [`RsvpError::InvalidInput`] when the event id or submitter id is blank,
/// the attendee list is empty or too long, an attendee has no name, or the
/// family name or email is missing.
pub fn validate(
    submission: Submission,
    submitter_id: SubmitterId,
    limits: &SubmissionLimits,
) -> Result<ValidatedSubmission, RsvpError> {
    let event_id: EventId = submission
        .event_id
        .parse()
        .map_err(|_| RsvpError::invalid("eventId", "is required"))?;

    if submitter_id.as_str().trim().is_empty() {
        return Err(RsvpError::invalid("submitterId", "is required"));
    }

    if submission.attendees.is_empty() {
        return Err(RsvpError::invalid(
            "attendees",
            "at least one attendee is required",
        ));
    }
    if submission.attendees.len() > limits.max_attendees {
        return Err(RsvpError::invalid(
            "attendees",
            format!("at most {} attendees per RSVP", limits.max_attendees),
        ));
    }

    let max = limits.max_text_length;
    let attendees = submission
        .attendees
        .into_iter()
        .enumerate()
        .map(|(i, attendee)| {
            let name = sanitize_text(&attendee.name, max);
            if name.is_empty() {
                return Err(RsvpError::invalid(
                    "attendees",
                    format!("attendee {} is missing a name", i + 1),
                ));
            }
            Ok(Attendee {
                name,
                age: attendee.age,
                den: optional_text(attendee.den.as_deref(), max),
                is_adult: attendee.is_adult,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raw = submission.contact;
    let contact = ContactFields {
        family_name: required_text("familyName", &raw.family_name, max)?,
        email: required_text("email", &raw.email, max)?,
        phone: optional_text(raw.phone.as_deref(), max),
        dietary_restrictions: optional_text(raw.dietary_restrictions.as_deref(), max),
        special_needs: optional_text(raw.special_needs.as_deref(), max),
        notes: optional_text(raw.notes.as_deref(), max),
    };

    Ok(ValidatedSubmission {
        event_id,
        submitter_id,
        request_id: optional_id::<RequestId>(submission.request_id.as_deref()),
        rsvp_id: optional_id::<RsvpId>(submission.rsvp_id.as_deref()),
        attendees,
        contact,
    })
}

/// Early, read-only check against the current event state.
///
/// # Errors
///
/// - [`RsvpError::EventNotFound`] if the event is missing or not active
/// - [`RsvpError::CapacityExceeded`] if the submission obviously does not fit
/// - [`RsvpError::TemporarilyUnavailable`] if the read fails
pub async fn precheck(
    store: &dyn LedgerStore,
    submission: &ValidatedSubmission,
) -> Result<(), RsvpError> {
    let Some(current) = store.get_event(submission.event_id.clone()).await? else {
        tracing::debug!(event_id = %submission.event_id, "Submission rejected: unknown event");
        return Err(RsvpError::EventNotFound(submission.event_id.clone()));
    };

    if !current.event.is_active() {
        tracing::debug!(
            event_id = %submission.event_id,
            status = current.event.status.as_str(),
            "Submission rejected: event not active"
        );
        return Err(RsvpError::EventNotFound(submission.event_id.clone()));
    }

    if current.event.capacity.is_none() {
        return Ok(());
    }

    let existing = store
        .find_rsvp(idempotency::selector_for(submission))
        .await?
        .filter(|r| r.event_id == submission.event_id);

    // An amendment of an unknown RSVP is reported by the commit as not found.
    if existing.is_none() && submission.rsvp_id.is_some() {
        return Ok(());
    }
    let previous = existing.map_or(0, |r| r.attendee_count());

    let delta = ledger::delta_between(previous, submission.attendee_count());
    ledger::check_capacity(&current.event, delta).inspect_err(|e| {
        tracing::debug!(
            event_id = %submission.event_id,
            delta,
            remaining_spots = e.remaining_spots(),
            "Submission rejected early: capacity"
        );
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pack_rsvp_testing::fixtures::{contact, event, family};
    use pack_rsvp_testing::InMemoryLedgerStore;

    fn submitter() -> SubmitterId {
        SubmitterId::new("family-1")
    }

    fn valid() -> Submission {
        Submission::new("campout", family(2), contact("Rivera"))
    }

    #[test]
    fn accepts_and_normalizes() {
        let mut submission = valid();
        submission.attendees[0].name = "  <i>Ana</i> ".to_string();
        submission.contact.notes = Some("   ".to_string());
        submission.contact.phone = Some(" 555-0101 ".to_string());

        let ok = validate(submission, submitter(), &SubmissionLimits::default()).unwrap();

        assert_eq!(ok.event_id, EventId::new("campout"));
        assert_eq!(ok.attendees[0].name, "Ana");
        assert_eq!(ok.contact.notes, None);
        assert_eq!(ok.contact.phone.as_deref(), Some("555-0101"));
        assert_eq!(ok.attendee_count(), 2);
    }

    #[test]
    fn rejects_missing_event_id() {
        let mut submission = valid();
        submission.event_id = "  ".to_string();
        let err = validate(submission, submitter(), &SubmissionLimits::default()).unwrap_err();
        assert!(matches!(err, RsvpError::InvalidInput { field: "eventId", .. }));
    }

    #[test]
    fn rejects_empty_attendee_list() {
        let mut submission = valid();
        submission.attendees.clear();
        let err = validate(submission, submitter(), &SubmissionLimits::default()).unwrap_err();
        assert!(matches!(err, RsvpError::InvalidInput { field: "attendees", .. }));
    }

    #[test]
    fn rejects_nameless_attendee() {
        let mut submission = valid();
        submission.attendees[1].name = "<br/>".to_string();
        let err = validate(submission, submitter(), &SubmissionLimits::default()).unwrap_err();
        assert_eq!(
            err,
            RsvpError::invalid("attendees", "attendee 2 is missing a name")
        );
    }

    #[test]
    fn rejects_too_many_attendees() {
        let limits = SubmissionLimits {
            max_attendees: 3,
            ..SubmissionLimits::default()
        };
        let submission = Submission::new("campout", family(4), contact("Rivera"));
        assert!(validate(submission, submitter(), &limits).is_err());
    }

    #[test]
    fn rejects_missing_contact_fields() {
        let mut submission = valid();
        submission.contact.email = String::new();
        let err = validate(submission, submitter(), &SubmissionLimits::default()).unwrap_err();
        assert!(matches!(err, RsvpError::InvalidInput { field: "email", .. }));
    }

    #[test]
    fn blank_optional_ids_are_absent() {
        let submission = valid().with_request_id(" ").amending("");
        let ok = validate(submission, submitter(), &SubmissionLimits::default()).unwrap();
        assert!(ok.request_id.is_none());
        assert!(ok.rsvp_id.is_none());
    }

    #[test]
    fn truncates_long_text() {
        let limits = SubmissionLimits {
            max_text_length: 5,
            ..SubmissionLimits::default()
        };
        let mut submission = valid();
        submission.contact.notes = Some("abcdefghij".to_string());
        let ok = validate(submission, submitter(), &limits).unwrap();
        assert_eq!(ok.contact.notes.as_deref(), Some("abcde"));
    }

    #[tokio::test]
    async fn precheck_rejects_unknown_and_inactive_events() {
        let store = InMemoryLedgerStore::new();
        let ok = validate(valid(), submitter(), &SubmissionLimits::default()).unwrap();

        assert_eq!(
            precheck(&store, &ok).await,
            Err(RsvpError::EventNotFound(EventId::new("campout")))
        );

        let mut cancelled = event("campout", Some(10));
        cancelled.status = pack_rsvp_core::model::EventStatus::Cancelled;
        store.insert_event(cancelled);
        assert!(matches!(
            precheck(&store, &ok).await,
            Err(RsvpError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn precheck_reports_remaining_spots() {
        let store = InMemoryLedgerStore::new();
        let mut full = event("campout", Some(10));
        full.current_participants = 8;
        store.insert_event(full);

        let ok = validate(
            Submission::new("campout", family(3), contact("Rivera")),
            submitter(),
            &SubmissionLimits::default(),
        )
        .unwrap();

        assert_eq!(precheck(&store, &ok).await.unwrap_err().remaining_spots(), Some(2));
    }

    #[tokio::test]
    async fn precheck_leaves_unknown_amendment_target_to_the_commit() {
        let store = InMemoryLedgerStore::new();
        let mut full = event("campout", Some(10));
        full.current_participants = 9;
        store.insert_event(full);

        let ok = validate(
            Submission::new("campout", family(3), contact("Rivera")).amending("r-404"),
            submitter(),
            &SubmissionLimits::default(),
        )
        .unwrap();

        assert_eq!(precheck(&store, &ok).await, Ok(()));
    }
}
