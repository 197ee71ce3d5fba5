//! PostgreSQL-backed event store.
//!
//! One `events` table carries both lifecycle phases. Mutual exclusion
//! rides on the partial unique index over `(target_name, target_value)
//! WHERE running`, so inserting a second running row for the same target
//! raises a unique violation. A target id addresses the running row; a
//! token id addresses a historical row by primary key. Every conditional
//! update is a single `UPDATE ... RETURNING` statement.

use crate::error::StoreError;
use crate::store::EventStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_domain::{CancelInfo, EventId, EventRecord, Target};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "event_id, target_name, target_value, kind, owner, \
     start_time, end_time, lock_update_time, start_custom_data, end_custom_data, \
     cancelable, running, error, log, \
     cancel_owner, cancel_reason, cancel_start_time, cancel_ack_time, \
     cancel_asked, cancel_canceled";

/// Run all pending migrations.
///
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))
}

/// PostgreSQL event store.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Flat row shape of the `events` table.
struct EventRow {
    event_id: Uuid,
    target_name: String,
    target_value: String,
    kind: String,
    owner: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    lock_update_time: DateTime<Utc>,
    start_custom_data: Option<serde_json::Value>,
    end_custom_data: Option<serde_json::Value>,
    cancelable: bool,
    running: bool,
    error: String,
    log: Option<String>,
    cancel_owner: String,
    cancel_reason: String,
    cancel_start_time: Option<DateTime<Utc>>,
    cancel_ack_time: Option<DateTime<Utc>>,
    cancel_asked: bool,
    cancel_canceled: bool,
}

impl<'r> FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            target_name: row.try_get("target_name")?,
            target_value: row.try_get("target_value")?,
            kind: row.try_get("kind")?,
            owner: row.try_get("owner")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            lock_update_time: row.try_get("lock_update_time")?,
            start_custom_data: row.try_get("start_custom_data")?,
            end_custom_data: row.try_get("end_custom_data")?,
            cancelable: row.try_get("cancelable")?,
            running: row.try_get("running")?,
            error: row.try_get("error")?,
            log: row.try_get("log")?,
            cancel_owner: row.try_get("cancel_owner")?,
            cancel_reason: row.try_get("cancel_reason")?,
            cancel_start_time: row.try_get("cancel_start_time")?,
            cancel_ack_time: row.try_get("cancel_ack_time")?,
            cancel_asked: row.try_get("cancel_asked")?,
            cancel_canceled: row.try_get("cancel_canceled")?,
        })
    }
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        let target = Target::new(row.target_name, row.target_value);
        let id = if row.running {
            EventId::Target(target.clone())
        } else {
            EventId::Token(row.event_id)
        };
        EventRecord {
            id,
            target,
            kind: row.kind,
            owner: row.owner,
            start_time: row.start_time,
            end_time: row.end_time,
            lock_update_time: row.lock_update_time,
            start_custom_data: row.start_custom_data,
            end_custom_data: row.end_custom_data,
            cancelable: row.cancelable,
            running: row.running,
            error: row.error,
            log: row.log,
            cancel_info: CancelInfo {
                owner: row.cancel_owner,
                reason: row.cancel_reason,
                start_time: row.cancel_start_time,
                ack_time: row.cancel_ack_time,
                asked: row.cancel_asked,
                canceled: row.cancel_canceled,
            },
        }
    }
}

/// Check if database error is a unique constraint violation
fn is_unique_violation(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err.code() == Some(std::borrow::Cow::Borrowed("23505"))
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, record: &EventRecord) -> Result<(), StoreError> {
        // The row key is the token for historical records; running rows
        // get a throwaway key and are addressed through their target.
        let event_id = match &record.id {
            EventId::Token(id) => *id,
            EventId::Target(_) => Uuid::now_v7(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                event_id, target_name, target_value, kind, owner,
                start_time, end_time, lock_update_time,
                start_custom_data, end_custom_data,
                cancelable, running, error, log,
                cancel_owner, cancel_reason, cancel_start_time, cancel_ack_time,
                cancel_asked, cancel_canceled
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8,
                $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17, $18,
                $19, $20
            )
            "#,
        )
        .bind(event_id)
        .bind(&record.target.name)
        .bind(&record.target.value)
        .bind(&record.kind)
        .bind(&record.owner)
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.lock_update_time)
        .bind(&record.start_custom_data)
        .bind(&record.end_custom_data)
        .bind(record.cancelable)
        .bind(record.running)
        .bind(&record.error)
        .bind(&record.log)
        .bind(&record.cancel_info.owner)
        .bind(&record.cancel_info.reason)
        .bind(record.cancel_info.start_time)
        .bind(record.cancel_info.ack_time)
        .bind(record.cancel_info.asked)
        .bind(record.cancel_info.canceled)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if is_unique_violation(db_err.as_ref()) => {
                Err(StoreError::duplicate(record.id.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        let row: Option<EventRow> = match id {
            EventId::Target(target) => {
                sqlx::query_as(&format!(
                    "SELECT {EVENT_COLUMNS} FROM events \
                     WHERE target_name = $1 AND target_value = $2 AND running",
                ))
                .bind(&target.name)
                .bind(&target.value)
                .fetch_optional(&self.pool)
                .await?
            },
            EventId::Token(token) => {
                sqlx::query_as(&format!(
                    "SELECT {EVENT_COLUMNS} FROM events \
                     WHERE event_id = $1 AND NOT running",
                ))
                .bind(token)
                .fetch_optional(&self.pool)
                .await?
            },
        };
        Ok(row.map(EventRecord::from))
    }

    async fn request_cancel(
        &self,
        id: &EventId,
        info: CancelInfo,
    ) -> Result<Option<EventRecord>, StoreError> {
        // Historical rows are immutable; only a running row can be asked.
        let EventId::Target(target) = id else {
            return Ok(None);
        };

        let row: Option<EventRow> = sqlx::query_as(&format!(
            "UPDATE events SET \
                 cancel_owner = $3, cancel_reason = $4, cancel_start_time = $5, \
                 cancel_ack_time = NULL, cancel_asked = $6, cancel_canceled = FALSE \
             WHERE target_name = $1 AND target_value = $2 AND running \
             RETURNING {EVENT_COLUMNS}",
        ))
        .bind(&target.name)
        .bind(&target.value)
        .bind(&info.owner)
        .bind(&info.reason)
        .bind(info.start_time)
        .bind(info.asked)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EventRecord::from))
    }

    async fn ack_cancel(
        &self,
        id: &EventId,
        ack_time: DateTime<Utc>,
    ) -> Result<Option<EventRecord>, StoreError> {
        let EventId::Target(target) = id else {
            return Ok(None);
        };

        let row: Option<EventRow> = sqlx::query_as(&format!(
            "UPDATE events SET cancel_canceled = TRUE, cancel_ack_time = $3 \
             WHERE target_name = $1 AND target_value = $2 AND running AND cancel_asked \
             RETURNING {EVENT_COLUMNS}",
        ))
        .bind(&target.name)
        .bind(&target.value)
        .bind(ack_time)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EventRecord::from))
    }

    async fn remove_by_id(&self, id: &EventId) -> Result<(), StoreError> {
        let result = match id {
            EventId::Target(target) => {
                sqlx::query(
                    "DELETE FROM events \
                     WHERE target_name = $1 AND target_value = $2 AND running",
                )
                .bind(&target.name)
                .bind(&target.value)
                .execute(&self.pool)
                .await?
            },
            EventId::Token(token) => {
                sqlx::query("DELETE FROM events WHERE event_id = $1 AND NOT running")
                    .bind(token)
                    .execute(&self.pool)
                    .await?
            },
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(id.to_string()));
        }
        Ok(())
    }

    async fn touch_running(
        &self,
        targets: &[Target],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if targets.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        let values: Vec<&str> = targets.iter().map(|t| t.value.as_str()).collect();

        sqlx::query(
            r#"
            UPDATE events SET lock_update_time = $1
            WHERE running AND (target_name, target_value) IN (
                SELECT name, value FROM unnest($2::text[], $3::text[]) AS t(name, value)
            )
            "#,
        )
        .bind(now)
        .bind(&names)
        .bind(&values)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY start_time DESC",
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }
}
