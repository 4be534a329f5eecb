//! The `Decision` trait: pure planning of a ledger write.
//!
//! A decision looks at a [`LedgerSnapshot`] and a command and either rejects
//! the command or returns the exact [`LedgerWrite`] to commit. It performs no
//! I/O, so the commit loop can re-run it against a fresh snapshot every time
//! the store reports a concurrent modification.
//!
//! # Example
//!
//! ```
//! use pack_rsvp_core::decision::Decision;
//! use pack_rsvp_core::store::{LedgerSnapshot, LedgerWrite, RsvpMutation};
//! use pack_rsvp_core::environment::Clock;
//!
//! /// Sets the counter to a fixed value.
//! struct Overwrite;
//!
//! impl Decision for Overwrite {
//!     type Command = u32;
//!     type Environment = Box<dyn Clock>;
//!     type Error = String;
//!
//!     fn decide(
//!         &self,
//!         snapshot: &LedgerSnapshot,
//!         value: &u32,
//!         env: &Self::Environment,
//!     ) -> Result<LedgerWrite, String> {
//!         Ok(LedgerWrite {
//!             event_id: snapshot.event.id.clone(),
//!             expected_version: snapshot.version,
//!             participants_after: *value,
//!             delta: i64::from(*value) - i64::from(snapshot.event.current_participants),
//!             mutation: RsvpMutation::CounterOnly,
//!             at: env.now(),
//!         })
//!     }
//! }
//! ```

use crate::store::{LedgerSnapshot, LedgerWrite};

/// Pure read-check-write planner.
///
/// # Type Parameters
///
/// - `Command`: the request being decided (borrowed, so retries can reuse it)
/// - `Environment`: injected dependencies (clock, id generator)
/// - `Error`: rejection type
pub trait Decision {
    /// The request being decided
    type Command;

    /// Injected dependencies
    type Environment;

    /// Rejection type
    type Error;

    /// Decide the write for `command` against `snapshot`.
    ///
    /// Must be deterministic given the same snapshot, command and environment
    /// outputs.
    ///
    /// # Errors
    ///
    /// Returns the rejection when the command cannot be applied to this
    /// snapshot (capacity, ownership, event state).
    fn decide(
        &self,
        snapshot: &LedgerSnapshot,
        command: &Self::Command,
        env: &Self::Environment,
    ) -> Result<LedgerWrite, Self::Error>;
}
