//! Capacity ledger arithmetic.
//!
//! The ledger of an event is its `current_participants` counter. Every change
//! goes through [`apply_delta`] (submissions, amendments, cancellations) or
//! [`repair`] (reconciliation); both are pure and run inside a decision, i.e.
//! against the snapshot the commit is conditioned on.
//!
//! Rules:
//! - A positive delta must fit: `current + delta <= capacity`.
//! - A negative delta is always accepted, even on an event that sits above its
//!   capacity (legacy overbooking, lowered cap).
//! - The counter never goes below zero. A decrement that would is clamped and
//!   reported as drift.

use crate::error::RsvpError;
use pack_rsvp_core::model::Event;

/// The counter change a decision will write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerChange {
    /// Counter value after the write
    pub participants_after: u32,
    /// Change actually applied (differs from the requested delta when clamped)
    pub applied_delta: i64,
    /// Requested minus applied; non-zero means the ledger had drifted
    pub drift: i64,
}

/// Signed attendee difference between two versions of an RSVP.
#[must_use]
pub fn delta_between(previous: u32, next: u32) -> i64 {
    i64::from(next) - i64::from(previous)
}

/// Verify that `delta` fits the event's remaining capacity.
///
/// # Errors
///
/// [`RsvpError::CapacityExceeded`] with the remaining spots computed from
/// `event` when a positive delta overflows the cap.
pub fn check_capacity(event: &Event, delta: i64) -> Result<(), RsvpError> {
    let Some(capacity) = event.capacity else {
        return Ok(());
    };
    if delta <= 0 {
        return Ok(());
    }

    if i64::from(event.current_participants) + delta > i64::from(capacity.value()) {
        return Err(RsvpError::CapacityExceeded {
            event_id: event.id.clone(),
            requested: u32::try_from(delta).unwrap_or(u32::MAX),
            remaining_spots: capacity.value().saturating_sub(event.current_participants),
        });
    }
    Ok(())
}

/// Apply `delta` to the event's counter.
///
/// # Errors
///
/// [`RsvpError::CapacityExceeded`] per [`check_capacity`].
pub fn apply_delta(event: &Event, delta: i64) -> Result<LedgerChange, RsvpError> {
    check_capacity(event, delta)?;

    let before = i64::from(event.current_participants);
    let wanted = before + delta;
    let after = wanted.clamp(0, i64::from(u32::MAX));

    if after != wanted {
        tracing::warn!(
            event_id = %event.id,
            current_participants = event.current_participants,
            delta,
            "Ledger drift: counter change clamped"
        );
    }

    Ok(LedgerChange {
        participants_after: u32::try_from(after).unwrap_or(u32::MAX),
        applied_delta: after - before,
        drift: wanted - after,
    })
}

/// Replace the counter with a recomputed attendee total.
///
/// # Errors
///
/// [`RsvpError::CapacityExceeded`] when the recomputed total is above the
/// event's capacity: a repair never persists an overbooked counter.
pub fn repair(event: &Event, recomputed: u64) -> Result<LedgerChange, RsvpError> {
    let total = u32::try_from(recomputed).unwrap_or(u32::MAX);

    if let Some(capacity) = event.capacity.filter(|cap| total > cap.value()) {
        return Err(RsvpError::CapacityExceeded {
            event_id: event.id.clone(),
            requested: total,
            remaining_spots: capacity.value().saturating_sub(event.current_participants),
        });
    }

    Ok(LedgerChange {
        participants_after: total,
        applied_delta: delta_between(event.current_participants, total),
        drift: 0,
    })
}
