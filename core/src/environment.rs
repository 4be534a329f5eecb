//! Environment traits - injected dependencies.
//!
//! Time and identifier generation are abstracted so that decisions stay
//! deterministic under test.

use crate::model::RsvpId;
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use pack_rsvp_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generates identifiers for new RSVP records.
pub trait IdGenerator: Send + Sync {
    /// A fresh, never reused RSVP id.
    fn next_rsvp_id(&self) -> RsvpId;
}

/// Random v4 UUID ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_rsvp_id(&self) -> RsvpId {
        RsvpId::new(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidIdGenerator;
        assert_ne!(ids.next_rsvp_id(), ids.next_rsvp_id());
    }
}
