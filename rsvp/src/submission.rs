//! Submission payloads, before and after validation.

use pack_rsvp_core::model::{
    Attendee, ContactFields, EventId, IdempotencyKey, RequestId, RsvpId, SubmitterId,
};
use serde::{Deserialize, Serialize};

/// An RSVP as sent by the client.
///
/// Contact fields sit at the top level of the payload next to `eventId` and
/// `attendees`. The submitter identity is not part of the payload; it comes
/// from the authentication collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Target event
    pub event_id: String,
    /// People attending, in the order given
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Contact details
    #[serde(flatten)]
    pub contact: ContactFields,
    /// Client request id, for flows that allow several RSVPs per family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Explicit RSVP to amend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsvp_id: Option<String>,
}

impl Submission {
    /// A fresh submission keyed by family.
    #[must_use]
    pub fn new(event_id: impl Into<String>, attendees: Vec<Attendee>, contact: ContactFields) -> Self {
        Self {
            event_id: event_id.into(),
            attendees,
            contact,
            request_id: None,
            rsvp_id: None,
        }
    }

    /// Key the submission by a client request id instead of by family.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Amend a specific RSVP.
    #[must_use]
    pub fn amending(mut self, rsvp_id: impl Into<String>) -> Self {
        self.rsvp_id = Some(rsvp_id.into());
        self
    }
}

/// A submission that passed shape validation: ids parsed, text normalized,
/// attendee list within bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSubmission {
    /// Target event
    pub event_id: EventId,
    /// Submitting family
    pub submitter_id: SubmitterId,
    /// Client request id, if keyed per request
    pub request_id: Option<RequestId>,
    /// Explicit RSVP to amend
    pub rsvp_id: Option<RsvpId>,
    /// Normalized attendees (non-empty)
    pub attendees: Vec<Attendee>,
    /// Normalized contact details
    pub contact: ContactFields,
}

impl ValidatedSubmission {
    /// Attendees this submission asks for.
    #[must_use]
    pub fn attendee_count(&self) -> u32 {
        u32::try_from(self.attendees.len()).unwrap_or(u32::MAX)
    }

    /// Key a retry of this submission is recognized by.
    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        match &self.request_id {
            Some(request_id) => IdempotencyKey::Request(request_id.clone()),
            None => IdempotencyKey::Family {
                event_id: self.event_id.clone(),
                submitter_id: self.submitter_id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn payload_uses_flat_camel_case_fields() {
        let json = r#"{
            "eventId": "campout",
            "familyName": "Rivera",
            "email": "rivera@example.org",
            "dietaryRestrictions": "vegetarian",
            "attendees": [{"name": "Ana", "age": 8, "isAdult": false}],
            "requestId": "req-1"
        }"#;

        let submission: Submission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.event_id, "campout");
        assert_eq!(submission.contact.family_name, "Rivera");
        assert_eq!(
            submission.contact.dietary_restrictions.as_deref(),
            Some("vegetarian")
        );
        assert_eq!(submission.attendees[0].age, Some(8));
        assert_eq!(submission.request_id.as_deref(), Some("req-1"));
        assert!(submission.rsvp_id.is_none());
    }
}
