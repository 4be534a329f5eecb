//! Prometheus metrics for the RSVP commit path.
//!
//! Covers:
//! - Ledger commits by outcome, conflicts and attempts per commit
//! - Commit latency
//! - Audit delivery failures
//! - Unresolved ids in batch queries
//!
//! # Example
//!
//! ```rust,no_run
//! use pack_rsvp_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the exporter serves on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (e.g. by an earlier test) is
    /// tolerated with a warning; `handle()` then stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .set_buckets_for_metric(
                Matcher::Full("rsvp_commit_attempts".to_string()),
                &[1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "rsvp_commits_total",
        "Commit outcomes by kind (created, amended, unchanged, cancelled, repaired, or the rejection kind)"
    );
    describe_counter!(
        "rsvp_commit_conflicts_total",
        "Optimistic-concurrency conflicts seen by the commit loop"
    );
    describe_histogram!(
        "rsvp_commit_attempts",
        "Attempts needed per commit, first try included"
    );
    describe_histogram!(
        "rsvp_commit_duration_seconds",
        "Time spent in the commit loop, retries included"
    );
    describe_counter!(
        "rsvp_audit_failures_total",
        "Audit facts that failed or timed out after a successful commit"
    );
    describe_counter!(
        "rsvp_query_unresolved_total",
        "Event ids a batch query could not resolve"
    );
    describe_counter!(
        "rsvp_store_rollbacks_total",
        "Ledger transactions rolled back by the store, by reason"
    );
}

/// Commit loop metrics recorder.
pub struct CommitMetrics;

impl CommitMetrics {
    /// Record a finished commit loop.
    pub fn record_outcome(outcome: &'static str, attempts: u32, duration: Duration) {
        counter!("rsvp_commits_total", "outcome" => outcome).increment(1);
        histogram!("rsvp_commit_attempts").record(f64::from(attempts));
        histogram!("rsvp_commit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record one optimistic-concurrency conflict.
    pub fn record_conflict() {
        counter!("rsvp_commit_conflicts_total").increment(1);
    }
}

/// Audit delivery metrics recorder.
pub struct AuditMetrics;

impl AuditMetrics {
    /// Record a failed or timed-out delivery.
    pub fn record_failure(kind: &'static str) {
        counter!("rsvp_audit_failures_total", "kind" => kind).increment(1);
    }
}

/// Query surface metrics recorder.
pub struct QueryMetrics;

impl QueryMetrics {
    /// Record ids a batch query left unresolved.
    pub fn record_unresolved(count: usize) {
        counter!("rsvp_query_unresolved_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_commit_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        CommitMetrics::record_outcome("created", 2, Duration::from_millis(12));
        CommitMetrics::record_conflict();
        AuditMetrics::record_failure("rsvp_recorded");
        QueryMetrics::record_unresolved(3);

        // The recorder is process-global; a second start() leaves handle None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("rsvp_commits_total"));
            assert!(rendered.contains("rsvp_commit_conflicts_total"));
            assert!(rendered.contains("rsvp_audit_failures_total"));
            assert!(rendered.contains("rsvp_query_unresolved_total"));
        }
    }

    #[test]
    fn test_recorders_without_exporter_are_noops() {
        CommitMetrics::record_outcome("rejected_capacity", 1, Duration::ZERO);
        QueryMetrics::record_unresolved(0);
    }
}
