//! Outbound result shape.
//!
//! The HTTP or callable layer serializes [`SubmissionResponse`] as is.

use crate::commit::{CommitReceipt, Disposition};
use crate::error::RsvpError;
use serde::Serialize;

/// Result of a submit or cancel, as returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    /// Whether the operation committed
    pub success: bool,
    /// RSVP written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp_id: Option<String>,
    /// Ledger counter after the commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_participant_total: Option<u32>,
    /// Machine-readable failure kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Spots left, on capacity rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_spots: Option<u32>,
    /// Human-readable message
    pub message: String,
}

fn failure_message(error: &RsvpError) -> String {
    match error {
        RsvpError::CapacityExceeded {
            remaining_spots: 0, ..
        } => "This event is full.".to_string(),
        RsvpError::CapacityExceeded {
            remaining_spots, ..
        } => format!("Only {remaining_spots} spot(s) remaining for this event."),
        RsvpError::TemporarilyUnavailable { .. } => {
            "The event is busy right now. Please try again in a moment.".to_string()
        }
        RsvpError::EventNotFound(_) => "This event is not accepting RSVPs.".to_string(),
        RsvpError::RsvpNotFound(_) => "RSVP not found.".to_string(),
        RsvpError::PermissionDenied { .. } => {
            "You can only change your own RSVPs.".to_string()
        }
        RsvpError::InvalidInput { .. } => error.to_string(),
    }
}

impl From<Result<CommitReceipt, RsvpError>> for SubmissionResponse {
    fn from(result: Result<CommitReceipt, RsvpError>) -> Self {
        match result {
            Ok(receipt) => Self {
                success: true,
                rsvp_id: Some(receipt.rsvp_id.into_inner()),
                new_participant_total: Some(receipt.new_participant_total),
                error_kind: None,
                remaining_spots: None,
                message: match receipt.disposition {
                    Disposition::Created | Disposition::Unchanged => "RSVP submitted successfully",
                    Disposition::Amended => "RSVP updated successfully",
                    Disposition::Cancelled => "RSVP deleted successfully",
                }
                .to_string(),
            },
            Err(error) => Self {
                success: false,
                rsvp_id: None,
                new_participant_total: None,
                error_kind: Some(error.kind()),
                remaining_spots: error.remaining_spots(),
                message: failure_message(&error),
            },
        }
    }
}
