//! Event outbox repository.
//!
//! `enqueue` runs inside the caller's transaction so the event commits or
//! rolls back with the state change it describes. The dispatcher claims
//! batches with `FOR UPDATE SKIP LOCKED`, ordered by
//! `(aggregate_id, created_at)` to preserve per-aggregate FIFO.

use crate::error::AppError;
use crate::models::outbox::OutboxEvent;
use crate::types::EventId;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

const TABLE_NAME: &str = "event_outbox";
const SELECT_COLUMNS: &str = "id, organization_id, event_name, aggregate_type, aggregate_id, \
payload, metadata, status, created_at, processed_at, retry_count, last_error, next_retry_at";

#[derive(Debug, Default, Clone, Copy)]
pub struct OutboxRepository;

impl OutboxRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn enqueue(
        &self,
        db: impl PgExecutor<'_>,
        event: &OutboxEvent,
    ) -> Result<OutboxEvent, AppError> {
        let query = format!(
            "INSERT INTO {} (id, organization_id, event_name, aggregate_type, aggregate_id, \
             payload, metadata, status, created_at, processed_at, retry_count, last_error, \
             next_retry_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {}",
            TABLE_NAME, SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, OutboxEvent>(&query)
            .bind(event.id)
            .bind(event.organization_id)
            .bind(&event.event_name)
            .bind(&event.aggregate_type)
            .bind(event.aggregate_id)
            .bind(&event.payload)
            .bind(&event.metadata)
            .bind(event.status.db_value())
            .bind(event.created_at)
            .bind(event.processed_at)
            .bind(event.retry_count)
            .bind(&event.last_error)
            .bind(event.next_retry_at)
            .fetch_one(db)
            .await?;
        Ok(row)
    }

    /// Claims up to `limit` deliverable events for this dispatcher pass.
    pub async fn claim_batch(
        &self,
        db: impl PgExecutor<'_>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEvent>, AppError> {
        let query = format!(
            "SELECT {} FROM {} WHERE status = 'pending' \
             AND (next_retry_at IS NULL OR next_retry_at <= $1) \
             ORDER BY aggregate_id, created_at LIMIT $2 FOR UPDATE SKIP LOCKED",
            SELECT_COLUMNS, TABLE_NAME
        );
        let rows = sqlx::query_as::<_, OutboxEvent>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn mark_processed(
        &self,
        db: impl PgExecutor<'_>,
        id: EventId,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET status = 'processed', processed_at = $1 \
             WHERE id = $2 AND status = 'pending'",
            TABLE_NAME
        );
        let result = sqlx::query(&query).bind(now).bind(id).execute(db).await?;
        Ok(result.rows_affected())
    }

    /// Records a delivery failure and schedules the retry, or dead-letters
    /// once `max_retries` is exhausted.
    pub async fn mark_failed(
        &self,
        db: impl PgExecutor<'_>,
        id: EventId,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
        max_retries: i32,
    ) -> Result<u64, AppError> {
        let query = format!(
            "UPDATE {} SET retry_count = retry_count + 1, last_error = $1, next_retry_at = $2, \
             status = CASE WHEN retry_count + 1 > $3 THEN 'dead_letter' ELSE 'pending' END \
             WHERE id = $4 AND status = 'pending'",
            TABLE_NAME
        );
        let result = sqlx::query(&query)
            .bind(error)
            .bind(next_retry_at)
            .bind(max_retries)
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_by_id(
        &self,
        db: impl PgExecutor<'_>,
        id: EventId,
    ) -> Result<OutboxEvent, AppError> {
        let query = format!("SELECT {} FROM {} WHERE id = $1", SELECT_COLUMNS, TABLE_NAME);
        sqlx::query_as::<_, OutboxEvent>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("Outbox event not found".into()))
    }

    pub async fn count_pending(&self, db: impl PgExecutor<'_>) -> Result<i64, AppError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE status = 'pending'", TABLE_NAME);
        let count: i64 = sqlx::query_scalar(&query).fetch_one(db).await?;
        Ok(count)
    }
}
