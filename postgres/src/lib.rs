//! `PostgreSQL` ledger store for the RSVP capacity-commit subsystem.
//!
//! Implements [`LedgerStore`] on two tables:
//!
//! - `events`: one row per event, carrying the capacity ledger
//!   (`current_participants`) and the document `version`
//! - `rsvps`: one row per RSVP, with a unique `idempotency_key`
//!
//! A commit is a single transaction whose first statement is a
//! version-conditioned `UPDATE` of the event row. If the row is no longer at
//! the expected version nothing else runs and the caller gets
//! [`StoreError::ConcurrencyConflict`]; the RSVP insert, update or delete
//! happens in the same transaction, so the counter and the RSVP collection
//! never diverge.
//!
//! # Example
//!
//! ```no_run
//! use pack_rsvp_postgres::{PoolSettings, PostgresLedgerStore, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresLedgerStore::connect(&PoolSettings::new("postgres://localhost/rsvp")).await?;
//! migrate(store.pool()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use pack_rsvp_core::model::{
    Attendee, Capacity, ContactFields, Event, EventId, EventStatus, RequestId, RsvpId, RsvpRecord,
    SubmitterId, VersionedEvent,
};
use pack_rsvp_core::store::{
    LedgerSnapshot, LedgerStore, LedgerWrite, RsvpMutation, RsvpSelector, StoreError, StoreFuture,
};
use pack_rsvp_core::version::Version;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// Connection pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Settings with default pool sizes for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

fn db(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

fn to_i64(version: Version, what: &str) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Serialization(format!("{what} {version} out of range")))
}

fn to_version(raw: i64) -> Result<Version, StoreError> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| StoreError::Serialization(format!("negative version {raw}")))
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

/// Create the tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    let statements = [
        r"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            capacity INTEGER CHECK (capacity IS NULL OR capacity > 0),
            current_participants INTEGER NOT NULL DEFAULT 0 CHECK (current_participants >= 0),
            status TEXT NOT NULL DEFAULT 'active',
            version BIGINT NOT NULL DEFAULT 0,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        ",
        r"
        CREATE TABLE IF NOT EXISTS rsvps (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            submitter_id TEXT NOT NULL,
            request_id TEXT,
            idempotency_key TEXT NOT NULL UNIQUE,
            attendees JSONB NOT NULL,
            attendee_count INTEGER NOT NULL CHECK (attendee_count > 0),
            contact JSONB NOT NULL,
            submitted_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        ",
        "CREATE INDEX IF NOT EXISTS idx_rsvps_event ON rsvps(event_id)",
        "CREATE INDEX IF NOT EXISTS idx_rsvps_submitter ON rsvps(submitter_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await.map_err(db)?;
    }

    tracing::info!("RSVP schema ready");
    Ok(())
}

const EVENT_COLUMNS: &str = "id, title, capacity, current_participants, status, version";
const RSVP_COLUMNS: &str = "id, event_id, submitter_id, request_id, attendees, contact, submitted_at, updated_at";

/// `PostgreSQL` implementation of [`LedgerStore`].
#[derive(Clone, Debug)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(&settings.url)
            .await
            .map_err(db)?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or replace an event document.
    ///
    /// Events are owned by the event-management flow; this is its write path
    /// into the shared table. Replacing keeps the ledger counter and bumps the
    /// version so in-flight commits re-read the new capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the statement fails.
    pub async fn upsert_event(&self, event: &Event) -> Result<Version, StoreError> {
        let capacity = event
            .capacity
            .map(|c| to_i32(c.value(), "capacity"))
            .transpose()?;

        let version: i64 = sqlx::query_scalar(
            r"
            INSERT INTO events (id, title, capacity, current_participants, status, version)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                capacity = EXCLUDED.capacity,
                status = EXCLUDED.status,
                version = events.version + 1,
                updated_at = now()
            RETURNING version
            ",
        )
        .bind(event.id.as_str())
        .bind(&event.title)
        .bind(capacity)
        .bind(to_i32(event.current_participants, "current_participants")?)
        .bind(event.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        to_version(version)
    }

    fn event_from_row(row: &PgRow) -> Result<VersionedEvent, StoreError> {
        let id: String = row.try_get("id").map_err(db)?;
        let capacity: Option<i32> = row.try_get("capacity").map_err(db)?;
        let current: i32 = row.try_get("current_participants").map_err(db)?;
        let status: String = row.try_get("status").map_err(db)?;

        let status = EventStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown event status {status}")))?;

        Ok(VersionedEvent {
            event: Event {
                id: EventId::new(id),
                title: row.try_get("title").map_err(db)?,
                capacity: capacity
                    .and_then(|c| u32::try_from(c).ok())
                    .and_then(Capacity::new),
                current_participants: u32::try_from(current).unwrap_or(0),
                status,
            },
            version: to_version(row.try_get("version").map_err(db)?)?,
        })
    }

    fn rsvp_from_row(row: &PgRow) -> Result<RsvpRecord, StoreError> {
        let attendees: Json<Vec<Attendee>> = row
            .try_get("attendees")
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let contact: Json<ContactFields> = row
            .try_get("contact")
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let request_id: Option<String> = row.try_get("request_id").map_err(db)?;
        let submitted_at: DateTime<Utc> = row.try_get("submitted_at").map_err(db)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(db)?;

        Ok(RsvpRecord::restore(
            RsvpId::new(row.try_get::<String, _>("id").map_err(db)?),
            EventId::new(row.try_get::<String, _>("event_id").map_err(db)?),
            SubmitterId::new(row.try_get::<String, _>("submitter_id").map_err(db)?),
            request_id.map(RequestId::new),
            attendees.0,
            contact.0,
            submitted_at,
            updated_at,
        ))
    }

    async fn select_rsvp<'e, E>(
        executor: E,
        selector: &RsvpSelector,
    ) -> Result<Option<RsvpRecord>, StoreError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let (column, value) = match selector {
            RsvpSelector::Key(key) => ("idempotency_key", key.storage_key()),
            RsvpSelector::Id(id) => ("id", id.to_string()),
        };
        let sql = format!("SELECT {RSVP_COLUMNS} FROM rsvps WHERE {column} = $1");

        sqlx::query(&sql)
            .bind(value)
            .fetch_optional(executor)
            .await
            .map_err(db)?
            .as_ref()
            .map(Self::rsvp_from_row)
            .transpose()
    }

    async fn select_rsvps(&self, column: &str, value: &str) -> Result<Vec<RsvpRecord>, StoreError> {
        let sql = format!("SELECT {RSVP_COLUMNS} FROM rsvps WHERE {column} = $1");

        sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?
            .iter()
            .map(Self::rsvp_from_row)
            .collect()
    }

    async fn snapshot(
        &self,
        event_id: EventId,
        selector: Option<RsvpSelector>,
    ) -> Result<Option<LedgerSnapshot>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let Some(row) = sqlx::query(&sql)
            .bind(event_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
        else {
            return Ok(None);
        };
        let current = Self::event_from_row(&row)?;

        let existing = match &selector {
            Some(selector) => Self::select_rsvp(&mut *tx, selector).await?,
            None => None,
        };

        tx.commit().await.map_err(db)?;

        Ok(Some(LedgerSnapshot {
            event: current.event,
            version: current.version,
            existing,
        }))
    }

    async fn write_rsvp(
        tx: &mut Transaction<'_, Postgres>,
        write: &LedgerWrite,
    ) -> Result<(), StoreError> {
        let affected = match &write.mutation {
            RsvpMutation::Unchanged(_) | RsvpMutation::CounterOnly => return Ok(()),
            RsvpMutation::Create(record) => sqlx::query(
                r"
                INSERT INTO rsvps (
                    id, event_id, submitter_id, request_id, idempotency_key,
                    attendees, attendee_count, contact, submitted_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(record.id.as_str())
            .bind(record.event_id.as_str())
            .bind(record.submitter_id.as_str())
            .bind(record.request_id.as_ref().map(RequestId::as_str))
            .bind(record.idempotency_key().storage_key())
            .bind(Json(record.attendees()))
            .bind(to_i32(record.attendee_count(), "attendee_count")?)
            .bind(Json(&record.contact))
            .bind(record.submitted_at)
            .bind(record.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(db)?,
            RsvpMutation::Amend(record) => sqlx::query(
                r"
                UPDATE rsvps
                SET attendees = $2, attendee_count = $3, contact = $4, updated_at = $5
                WHERE id = $1 AND event_id = $6
                ",
            )
            .bind(record.id.as_str())
            .bind(Json(record.attendees()))
            .bind(to_i32(record.attendee_count(), "attendee_count")?)
            .bind(Json(&record.contact))
            .bind(record.updated_at)
            .bind(write.event_id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(db)?,
            RsvpMutation::Cancel(record) => {
                sqlx::query("DELETE FROM rsvps WHERE id = $1 AND event_id = $2")
                    .bind(record.id.as_str())
                    .bind(write.event_id.as_str())
                    .execute(&mut **tx)
                    .await
                    .map_err(db)?
            }
        };

        if affected.rows_affected() == 1 {
            Ok(())
        } else {
            Err(StoreError::Database(format!(
                "RSVP row for event {} was not written ({} rows)",
                write.event_id,
                affected.rows_affected()
            )))
        }
    }

    async fn apply(&self, write: LedgerWrite) -> Result<Version, StoreError> {
        if !write.mutation.requires_write() {
            return Ok(write.expected_version);
        }

        let mut tx = self.pool.begin().await.map_err(db)?;

        let bumped: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE events
            SET current_participants = $1, version = version + 1, updated_at = $2
            WHERE id = $3 AND version = $4
            RETURNING version
            ",
        )
        .bind(to_i32(write.participants_after, "current_participants")?)
        .bind(write.at)
        .bind(write.event_id.as_str())
        .bind(to_i64(write.expected_version, "version")?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;

        let Some(bumped) = bumped else {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM events WHERE id = $1")
                .bind(write.event_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
            tx.rollback().await.map_err(db)?;

            return match actual {
                Some(actual) => {
                    metrics::counter!("rsvp_store_rollbacks_total", "reason" => "version").increment(1);
                    Err(StoreError::ConcurrencyConflict {
                        event_id: write.event_id,
                        expected: write.expected_version,
                        actual: to_version(actual)?,
                    })
                }
                None => Err(StoreError::EventNotFound(write.event_id)),
            };
        };

        if let Err(error) = Self::write_rsvp(&mut tx, &write).await {
            metrics::counter!("rsvp_store_rollbacks_total", "reason" => "rsvp").increment(1);
            tracing::error!(event_id = %write.event_id, error = %error, "Rolling back ledger commit");
            tx.rollback().await.map_err(db)?;
            return Err(error);
        }

        tx.commit().await.map_err(db)?;
        to_version(bumped)
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Option<VersionedEvent>> {
        Box::pin(async move {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
            sqlx::query(&sql)
                .bind(event_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(Self::event_from_row)
                .transpose()
        })
    }

    fn get_events(&self, event_ids: Vec<EventId>) -> StoreFuture<'_, Vec<VersionedEvent>> {
        Box::pin(async move {
            let ids: Vec<String> = event_ids.into_iter().map(EventId::into_inner).collect();
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ANY($1)");
            sqlx::query(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
                .await
                .map_err(db)?
                .iter()
                .map(Self::event_from_row)
                .collect()
        })
    }

    fn find_rsvp(&self, selector: RsvpSelector) -> StoreFuture<'_, Option<RsvpRecord>> {
        Box::pin(async move { Self::select_rsvp(&self.pool, &selector).await })
    }

    fn load_snapshot(
        &self,
        event_id: EventId,
        selector: Option<RsvpSelector>,
    ) -> StoreFuture<'_, Option<LedgerSnapshot>> {
        Box::pin(self.snapshot(event_id, selector))
    }

    fn commit(&self, write: LedgerWrite) -> StoreFuture<'_, Version> {
        Box::pin(self.apply(write))
    }

    fn rsvps_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<RsvpRecord>> {
        Box::pin(async move { self.select_rsvps("event_id", event_id.as_str()).await })
    }

    fn rsvps_for_submitter(&self, submitter_id: SubmitterId) -> StoreFuture<'_, Vec<RsvpRecord>> {
        Box::pin(async move { self.select_rsvps("submitter_id", submitter_id.as_str()).await })
    }
}
