//! # Pack RSVP Runtime
//!
//! Generic infrastructure shared by the RSVP services:
//!
//! - [`retry`]: bounded exponential backoff with jitter, used to absorb
//!   optimistic-concurrency conflicts
//! - [`metrics`]: Prometheus exporter and the commit-path metric recorders
//!
//! Nothing in here knows about events or RSVPs.

pub mod metrics;
pub mod retry;

pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_with_predicate};
