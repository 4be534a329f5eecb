//! Errors surfaced to callers of the RSVP service.
//!
//! Optimistic-concurrency conflicts never appear here: the commit loop
//! consumes them, and only after the retry budget is spent does the caller see
//! [`RsvpError::TemporarilyUnavailable`].

use pack_rsvp_core::model::{EventId, RsvpId};
use pack_rsvp_core::store::StoreError;
use thiserror::Error;

/// Rejections and failures of RSVP operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RsvpError {
    /// Caller error; not retried.
    #[error("Invalid {field}: {reason}")]
    InvalidInput {
        /// Offending input field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The event does not exist or no longer accepts RSVPs.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The RSVP to amend or cancel does not exist.
    #[error("RSVP not found: {0}")]
    RsvpNotFound(RsvpId),

    /// The requester does not own the RSVP.
    #[error("Permission denied on RSVP {rsvp_id} for {requester}")]
    PermissionDenied {
        /// RSVP the request targeted
        rsvp_id: RsvpId,
        /// Who asked
        requester: String,
    },

    /// The event is full. `remaining_spots` is read inside the commit.
    #[error("Event {event_id} has {remaining_spots} spot(s) left, {requested} requested")]
    CapacityExceeded {
        /// Event that is full
        event_id: EventId,
        /// Additional spots the request needed
        requested: u32,
        /// Spots left at failure time
        remaining_spots: u32,
    },

    /// Storage is busy or failing; the user may retry later.
    #[error("Temporarily unavailable: {reason}")]
    TemporarilyUnavailable {
        /// Underlying cause, for logs
        reason: String,
    },
}

impl RsvpError {
    /// Shorthand for [`RsvpError::InvalidInput`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, used in responses and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::EventNotFound(_) => "event_not_found",
            Self::RsvpNotFound(_) => "rsvp_not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::TemporarilyUnavailable { .. } => "temporarily_unavailable",
        }
    }

    /// Remaining spots, for capacity rejections.
    #[must_use]
    pub const fn remaining_spots(&self) -> Option<u32> {
        match self {
            Self::CapacityExceeded {
                remaining_spots, ..
            } => Some(*remaining_spots),
            _ => None,
        }
    }

    /// Whether the user can resubmit unchanged and expect a different result.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TemporarilyUnavailable { .. })
    }
}

impl From<StoreError> for RsvpError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::EventNotFound(event_id) => Self::EventNotFound(event_id),
            StoreError::ConcurrencyConflict { event_id, .. } => Self::TemporarilyUnavailable {
                reason: format!("event {event_id} is under heavy contention"),
            },
            other => Self::TemporarilyUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pack_rsvp_core::version::Version;

    #[test]
    fn store_errors_map_to_caller_taxonomy() {
        let gone: RsvpError = StoreError::EventNotFound(EventId::new("e2")).into();
        assert_eq!(gone, RsvpError::EventNotFound(EventId::new("e2")));

        let conflict: RsvpError = StoreError::ConcurrencyConflict {
            event_id: EventId::new("e1"),
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();
        assert!(conflict.is_retryable());

        let db: RsvpError = StoreError::Database("connection reset".into()).into();
        assert_eq!(db.kind(), "temporarily_unavailable");
    }

    #[test]
    fn capacity_error_reports_remaining_spots() {
        let err = RsvpError::CapacityExceeded {
            event_id: EventId::new("e1"),
            requested: 3,
            remaining_spots: 2,
        };
        assert_eq!(err.remaining_spots(), Some(2));
        assert_eq!(err.kind(), "capacity_exceeded");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2 spot(s) left"));
    }
}
