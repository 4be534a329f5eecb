//! Idempotency guard.
//!
//! A submission is recognized by its key: the `(event, family)` pair, or a
//! client request id when one is given. An explicit RSVP id targets that
//! record directly. The lookup runs as part of the commit snapshot, so the
//! "does it exist yet?" check and the write are serialized by the event
//! version; two retries cannot both conclude they are first.

use crate::error::RsvpError;
use crate::submission::ValidatedSubmission;
use pack_rsvp_core::model::RsvpRecord;
use pack_rsvp_core::store::RsvpSelector;

/// How a submission relates to what is already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Nothing stored under the key; create a record.
    Fresh,
    /// A record exists with different content; amend it.
    Amend(&'a RsvpRecord),
    /// A record exists with identical content; a retry of a committed
    /// submission.
    Unchanged(&'a RsvpRecord),
}

/// Selector the commit snapshot uses to find the record this submission
/// would amend.
#[must_use]
pub fn selector_for(submission: &ValidatedSubmission) -> RsvpSelector {
    match &submission.rsvp_id {
        Some(rsvp_id) => RsvpSelector::Id(rsvp_id.clone()),
        None => RsvpSelector::Key(submission.idempotency_key()),
    }
}

/// Classify a submission against the record found by [`selector_for`].
///
/// # Errors
///
/// - [`RsvpError::RsvpNotFound`] if an explicit RSVP id matches nothing
/// - [`RsvpError::InvalidInput`] if the found record belongs to another event
///   or family (explicit id or reused request id)
pub fn resolve<'a>(
    existing: Option<&'a RsvpRecord>,
    submission: &ValidatedSubmission,
) -> Result<Resolution<'a>, RsvpError> {
    let Some(record) = existing else {
        if let Some(rsvp_id) = &submission.rsvp_id {
            return Err(RsvpError::RsvpNotFound(rsvp_id.clone()));
        }
        return Ok(Resolution::Fresh);
    };

    if record.event_id != submission.event_id || record.submitter_id != submission.submitter_id {
        let field = if submission.rsvp_id.is_some() {
            "rsvpId"
        } else {
            "requestId"
        };
        return Err(RsvpError::invalid(
            field,
            "refers to an RSVP of another event or family",
        ));
    }

    if record.has_content(&submission.attendees, &submission.contact) {
        Ok(Resolution::Unchanged(record))
    } else {
        Ok(Resolution::Amend(record))
    }
}
