//! Document versioning for optimistic concurrency control.
//!
//! Every event document carries a [`Version`]. Each committed write against the
//! capacity ledger of an event (a new RSVP, an amendment, a cancellation, a
//! counter repair) bumps that version by exactly one. A commit names the
//! version it read; if the stored version has moved on, the write is rejected
//! and the caller re-reads and tries again.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version number of an event document.
///
/// Versions start at 0 when the event-management flow creates the event and
/// increment by 1 for each ledger commit.
///
/// # Examples
///
/// ```
/// use pack_rsvp_core::version::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created event document.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// Saturates at `u64::MAX`; no ledger sees that many commits.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
