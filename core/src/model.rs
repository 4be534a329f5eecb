//! Data model for events, RSVP records and their identifiers.
//!
//! The capacity ledger of an event is its `current_participants` counter. An
//! [`RsvpRecord`] is one family's attendance commitment; its attendee count is
//! always derived from its attendee list and is exactly the amount the record
//! contributes to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Error returned when parsing an identifier from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {kind}: identifier cannot be blank")]
pub struct ParseIdError {
    kind: &'static str,
}

/// Declares an opaque string identifier.
///
/// `new()` and `From` do not validate (trusted, application-controlled input);
/// `FromStr` rejects blank strings (external input).
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` from a string.")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert into the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError { kind: $kind });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Opaque, immutable identifier of an event.
    ///
    /// ```
    /// use pack_rsvp_core::model::EventId;
    ///
    /// let id: EventId = " spring-campout ".parse().unwrap();
    /// assert_eq!(id.as_str(), "spring-campout");
    /// assert!("  ".parse::<EventId>().is_err());
    /// ```
    EventId,
    "event id"
);

string_id!(
    /// Identifier of an RSVP record, generated at commit time.
    RsvpId,
    "RSVP id"
);

string_id!(
    /// Identity of the submitting user, handed over by the authentication
    /// collaborator. Treated as an opaque string; legacy unauthenticated
    /// submissions carry a synthetic placeholder identity.
    SubmitterId,
    "submitter id"
);

string_id!(
    /// Client-supplied request identifier for flows that allow several RSVPs
    /// per family and event.
    RequestId,
    "request id"
);

// ============================================================================
// Capacity and events
// ============================================================================

/// Maximum number of attendees an event accepts. Always positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Capacity(u32);

impl Capacity {
    /// Creates a `Capacity`; `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Capacity {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "capacity must be a positive integer".to_string())
    }
}

impl From<Capacity> for u32 {
    fn from(capacity: Capacity) -> Self {
        capacity.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an event, owned by the event-management flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Accepting RSVPs
    Active,
    /// Called off; existing RSVPs may still be cancelled
    Cancelled,
    /// Past event kept for history
    Archived,
}

impl EventStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    /// Parse from the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// An event as seen by the capacity-commit subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Immutable identifier
    pub id: EventId,
    /// Display title (informational only)
    pub title: String,
    /// Attendance cap; `None` means unlimited
    pub capacity: Option<Capacity>,
    /// Confirmed attendees (the capacity ledger)
    pub current_participants: u32,
    /// Lifecycle status
    pub status: EventStatus,
}

impl Event {
    /// Creates an active event with an empty ledger.
    #[must_use]
    pub fn new(id: EventId, title: impl Into<String>, capacity: Option<Capacity>) -> Self {
        Self {
            id,
            title: title.into(),
            capacity,
            current_participants: 0,
            status: EventStatus::Active,
        }
    }

    /// Whether the event accepts new or amended RSVPs.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, EventStatus::Active)
    }

    /// Spots left before the cap; `None` for unlimited events.
    ///
    /// Saturates at zero when the ledger already sits above the cap (a legacy
    /// overbooking or a lowered capacity).
    #[must_use]
    pub fn remaining_spots(&self) -> Option<u32> {
        self.capacity
            .map(|cap| cap.value().saturating_sub(self.current_participants))
    }
}

/// An event document together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedEvent {
    /// The event document
    pub event: Event,
    /// Version at read time
    pub version: crate::version::Version,
}

// ============================================================================
// RSVP records
// ============================================================================

/// One person attending with a family RSVP.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    /// Full name (required)
    pub name: String,
    /// Age in years, if given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    /// Den the scout belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub den: Option<String>,
    /// Adult (parent/guardian) rather than scout
    #[serde(default)]
    pub is_adult: bool,
}

impl Attendee {
    /// Attendee with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: None,
            den: None,
            is_adult: false,
        }
    }
}

/// Contact details passed through with an RSVP.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFields {
    /// Family name shown on rosters
    pub family_name: String,
    /// Contact email
    pub email: String,
    /// Contact phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Dietary restrictions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dietary_restrictions: Option<String>,
    /// Special needs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_needs: Option<String>,
    /// Free-form notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Key used to recognize a retried or repeated submission.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdempotencyKey {
    /// One RSVP per family per event.
    Family {
        /// Event the RSVP is for
        event_id: EventId,
        /// Submitting family
        submitter_id: SubmitterId,
    },
    /// One RSVP per client request.
    Request(RequestId),
}

impl IdempotencyKey {
    /// Stable string form used as the unique storage key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Family {
                event_id,
                submitter_id,
            } => format!(
                "family:{}:{}:{}",
                event_id.as_str().len(),
                event_id,
                submitter_id
            ),
            Self::Request(request_id) => format!("request:{request_id}"),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A committed RSVP.
///
/// `attendee_count` is derived from `attendees` and has no setter; the only
/// way to change it is [`RsvpRecord::amend`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpRecord {
    /// Record identifier
    pub id: RsvpId,
    /// Owning event
    pub event_id: EventId,
    /// Submitting family
    pub submitter_id: SubmitterId,
    /// Client request id when the record is keyed per request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    attendees: Vec<Attendee>,
    attendee_count: u32,
    /// Contact details
    pub contact: ContactFields,
    /// First commit time
    pub submitted_at: DateTime<Utc>,
    /// Last amendment time
    pub updated_at: DateTime<Utc>,
}

impl RsvpRecord {
    /// Builds a record; timestamps both set to `at`.
    #[must_use]
    pub fn new(
        id: RsvpId,
        event_id: EventId,
        submitter_id: SubmitterId,
        request_id: Option<RequestId>,
        attendees: Vec<Attendee>,
        contact: ContactFields,
        at: DateTime<Utc>,
    ) -> Self {
        let attendee_count = count_of(&attendees);
        Self {
            id,
            event_id,
            submitter_id,
            request_id,
            attendees,
            attendee_count,
            contact,
            submitted_at: at,
            updated_at: at,
        }
    }

    /// Rebuilds a stored record with its original timestamps.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: RsvpId,
        event_id: EventId,
        submitter_id: SubmitterId,
        request_id: Option<RequestId>,
        attendees: Vec<Attendee>,
        contact: ContactFields,
        submitted_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::new(
            id,
            event_id,
            submitter_id,
            request_id,
            attendees,
            contact,
            submitted_at,
        );
        record.updated_at = updated_at;
        record
    }

    /// Attendee list, in submission order.
    #[must_use]
    pub fn attendees(&self) -> &[Attendee] {
        &self.attendees
    }

    /// Number of attendees; what this record contributes to the ledger.
    #[must_use]
    pub const fn attendee_count(&self) -> u32 {
        self.attendee_count
    }

    /// The key this record answers to.
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

    /// Whether a resubmission carries exactly this record's content.
    #[must_use]
    pub fn has_content(&self, attendees: &[Attendee], contact: &ContactFields) -> bool {
        self.attendees == attendees && &self.contact == contact
    }

    /// Replaces attendees and contact details, returning the amended record.
    #[must_use]
    pub fn amend(
        mut self,
        attendees: Vec<Attendee>,
        contact: ContactFields,
        at: DateTime<Utc>,
    ) -> Self {
        self.attendee_count = count_of(&attendees);
        self.attendees = attendees;
        self.contact = contact;
        self.updated_at = at;
        self
    }
}

fn count_of(attendees: &[Attendee]) -> u32 {
    u32::try_from(attendees.len()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    fn record(attendees: Vec<Attendee>) -> RsvpRecord {
        RsvpRecord::new(
            RsvpId::new("r-1"),
            EventId::new("e-1"),
            SubmitterId::new("u-1"),
            None,
            attendees,
            ContactFields::default(),
            at(),
        )
    }

    #[test]
    fn capacity_rejects_zero() {
        assert!(Capacity::new(0).is_none());
        assert_eq!(Capacity::new(12).map(Capacity::value), Some(12));
        assert!(serde_json::from_str::<Capacity>("0").is_err());
    }

    #[test]
    fn attendee_count_is_derived() {
        let rsvp = record(vec![Attendee::named("Ada"), Attendee::named("Ben")]);
        assert_eq!(rsvp.attendee_count(), 2);

        let amended = rsvp.amend(
            vec![Attendee::named("Ada")],
            ContactFields::default(),
            at(),
        );
        assert_eq!(amended.attendee_count(), 1);
    }

    #[test]
    fn remaining_spots_saturates() {
        let mut event = Event::new(EventId::new("e-1"), "Pinewood Derby", Capacity::new(10));
        event.current_participants = 8;
        assert_eq!(event.remaining_spots(), Some(2));

        event.current_participants = 12;
        assert_eq!(event.remaining_spots(), Some(0));

        let unlimited = Event::new(EventId::new("e-2"), "Pack Meeting", None);
        assert_eq!(unlimited.remaining_spots(), None);
    }

    #[test]
    fn family_key_is_unambiguous() {
        let a = IdempotencyKey::Family {
            event_id: EventId::new("a:b"),
            submitter_id: SubmitterId::new("c"),
        };
        let b = IdempotencyKey::Family {
            event_id: EventId::new("a"),
            submitter_id: SubmitterId::new("b:c"),
        };
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn record_key_prefers_request_id() {
        let mut rsvp = record(vec![Attendee::named("Ada")]);
        assert!(matches!(rsvp.idempotency_key(), IdempotencyKey::Family { .. }));

        rsvp.request_id = Some(RequestId::new("req-9"));
        assert_eq!(
            rsvp.idempotency_key(),
            IdempotencyKey::Request(RequestId::new("req-9"))
        );
    }

    #[test]
    fn event_status_round_trips_through_db_strings() {
        for status in [EventStatus::Active, EventStatus::Cancelled, EventStatus::Archived] {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EventStatus::parse("deleted"), None);
    }
}
