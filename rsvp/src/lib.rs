//! # Pack RSVP
//!
//! Capacity-safe RSVP commits for pack events.
//!
//! Families submit RSVPs against events that may have a capacity. Every
//! change to an event's participant counter (its capacity ledger) goes
//! through one atomic, version-checked commit, so concurrent submissions can
//! neither overbook an event nor lose an update, and a retried submission is
//! applied at most once.
//!
//! ## Modules
//!
//! - [`service`]: submit and cancel
//! - [`validator`]: shape validation and read-only precheck
//! - [`commit`]: the atomic commit loop and its decisions
//! - [`ledger`]: counter arithmetic and capacity checks
//! - [`idempotency`]: how a submission relates to stored RSVPs
//! - [`query`]: totals, rosters and batch totals
//! - [`jobs`]: legacy backfill and ledger reconciliation
//! - [`audit`]: post-commit audit delivery
//! - [`response`]: outbound result shape
//! - [`config`], [`telemetry`]: ambient setup for binaries
//!
//! ## Example
//!
//! ```no_run
//! use pack_rsvp::service::RsvpService;
//! use pack_rsvp::submission::Submission;
//! use pack_rsvp_core::model::{Attendee, ContactFields, SubmitterId};
//! use pack_rsvp_postgres::{PoolSettings, PostgresLedgerStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLedgerStore::connect(&PoolSettings::new("postgres://localhost/rsvp")).await?;
//! let service = RsvpService::new(Arc::new(store));
//!
//! let submission = Submission::new(
//!     "spring-campout",
//!     vec![Attendee::named("Ana"), Attendee::named("Luis")],
//!     ContactFields {
//!         family_name: "Rivera".into(),
//!         email: "rivera@example.org".into(),
//!         ..ContactFields::default()
//!     },
//! );
//!
//! let receipt = service.submit(SubmitterId::new("family-42"), submission).await?;
//! println!("{} attending", receipt.new_participant_total);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod commit;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod query;
pub mod response;
pub mod service;
pub mod submission;
pub mod telemetry;
pub mod validator;

pub use error::RsvpError;
pub use service::RsvpService;
