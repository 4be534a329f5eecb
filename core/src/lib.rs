//! # Pack RSVP Core
//!
//! Core types and traits for the RSVP capacity-commit subsystem.
//!
//! This crate has no I/O. It defines:
//!
//! - **Model**: events with an optional capacity and a participant counter
//!   (the capacity ledger), RSVP records, identifiers, idempotency keys
//! - **Version**: document versions for optimistic concurrency
//! - **Store**: the [`store::LedgerStore`] trait with its single atomic write
//!   primitive, [`store::LedgerStore::commit`]
//! - **Decision**: pure planning of a ledger write from a snapshot
//! - **Environment**: injected clock and id generator
//! - **Audit**: facts handed to the audit-log collaborator
//!
//! ## Architecture Principles
//!
//! - Functional core (decisions), imperative shell (commit loop + store)
//! - One shared mutable resource per event: its ledger counter, written only
//!   through `commit`
//! - Dependencies injected via traits

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod audit;
pub mod decision;
pub mod environment;
pub mod model;
pub mod store;
pub mod version;
