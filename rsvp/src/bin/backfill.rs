//! `rsvp-backfill <legacy.json>`
//!
//! Replays a legacy RSVP export through the commit path and prints the
//! report as JSON. Safe to re-run: entries already replayed come back as
//! `unchanged`. Malformed entries are listed as rejected; the rest still run.

use anyhow::{Context, Result, bail};
use pack_rsvp::config::Config;
use pack_rsvp::jobs::{BackfillJob, LegacyExport};
use pack_rsvp::service::RsvpService;
use pack_rsvp::telemetry::init_tracing;
use pack_rsvp_core::audit::LogAuditSink;
use pack_rsvp_postgres::{PoolSettings, PostgresLedgerStore, migrate};
use pack_rsvp_runtime::metrics::MetricsServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,sqlx=warn");

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: rsvp-backfill <legacy.json>");
    };

    let config = Config::from_env().context("Failed to load configuration")?;

    let mut metrics = MetricsServer::new(config.metrics.addr()?);
    metrics.start()?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    let export = serde_json::from_str::<LegacyExport>(&raw)
        .with_context(|| format!("{path} is not a legacy RSVP export"))?;
    tracing::info!(path = %path, "Loaded legacy export");

    let store = PostgresLedgerStore::connect(&PoolSettings::from(&config.database))
        .await
        .context("Failed to connect to the database")?;
    migrate(store.pool()).await.context("Failed to prepare the schema")?;

    let service = RsvpService::from_config(Arc::new(store), Arc::new(LogAuditSink), &config);
    let report = BackfillJob::new(service).run_export(export).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(rendered) = metrics.render() {
        tracing::debug!(metrics = %rendered, "Final metrics");
    }

    if !report.rejected.is_empty() {
        tracing::warn!(rejected = report.rejected.len(), "Some legacy entries were not replayed");
    }
    Ok(())
}
