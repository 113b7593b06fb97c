use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::AggregateId;

use crate::{
    OutboxError, OutboxEvent, OutboxId, OutboxStatus, Result, RetryOutcome,
    event::backoff_delay,
    store::OutboxStore,
};

/// PostgreSQL-backed outbox store implementation.
///
/// The claim step uses `FOR UPDATE SKIP LOCKED` so concurrent drain passes
/// (including ones from other process instances) partition the pending pool
/// instead of double-dispatching it.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = "id, aggregate_id, event_type, event_data, created_at, processed_at, \
     retry_count, max_retries, next_retry_at, claimed_at, status, last_error";

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_entry(row: PgRow) -> Result<OutboxEvent> {
        let status: String = row.try_get("status")?;
        let status: OutboxStatus = status.parse().map_err(OutboxError::InvalidStatus)?;
        let event_json: serde_json::Value = row.try_get("event_data")?;

        Ok(OutboxEvent {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_id: AggregateId::new(row.try_get::<String, _>("aggregate_id")?),
            event_type: row.try_get("event_type")?,
            event_data: serde_json::from_value(event_json)?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            max_retries: row.try_get::<i32, _>("max_retries")? as u32,
            next_retry_at: row.try_get("next_retry_at")?,
            claimed_at: row.try_get("claimed_at")?,
            status,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn insert(&self, events: Vec<OutboxEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for entry in &events {
            let event_json = serde_json::to_value(&entry.event_data)?;

            sqlx::query(
                r#"
                INSERT INTO outbox_events
                    (id, aggregate_id, event_type, event_data, created_at, processed_at,
                     retry_count, max_retries, next_retry_at, claimed_at, status, last_error)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.aggregate_id.as_str())
            .bind(&entry.event_type)
            .bind(event_json)
            .bind(entry.created_at)
            .bind(entry.processed_at)
            .bind(entry.retry_count as i32)
            .bind(entry.max_retries as i32)
            .bind(entry.next_retry_at)
            .bind(entry.claimed_at)
            .bind(entry.status.as_str())
            .bind(&entry.last_error)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE outbox_events
            SET status = 'processing', claimed_at = now()
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= now())
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SELECT_COLUMNS}
            "#,
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed: Vec<OutboxEvent> = rows
            .into_iter()
            .map(Self::row_to_entry)
            .collect::<Result<_>>()?;
        claimed.sort_by_key(|e| e.created_at);

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "claimed outbox entries for dispatch");
        }
        Ok(claimed)
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<usize> {
        let cutoff = Utc::now() - lease;
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'processing' AND claimed_at <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected() as usize;
        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "reclaimed stale outbox claims");
        }
        Ok(reclaimed)
    }

    async fn mark_processed(&self, ids: &[OutboxId]) -> Result<()> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();

        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'completed', processed_at = now(), claimed_at = NULL
            WHERE id = ANY($1) AND status <> 'failed'
            "#,
        )
        .bind(&uuids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', next_retry_at = NULL, claimed_at = NULL, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: OutboxId, error: &str) -> Result<RetryOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT retry_count, max_retries, status FROM outbox_events WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OutboxError::NotFound(id))?;

        let retry_count = row.try_get::<i32, _>("retry_count")? as u32;
        let max_retries = row.try_get::<i32, _>("max_retries")? as u32;
        let status: String = row.try_get("status")?;

        // Failed is terminal: never resurrected.
        if status == OutboxStatus::Failed.as_str() {
            tx.commit().await?;
            return Ok(RetryOutcome::Exhausted);
        }

        let outcome = if retry_count + 1 < max_retries {
            let new_count = retry_count + 1;
            let next_retry_at = Utc::now() + backoff_delay(new_count);

            sqlx::query(
                r#"
                UPDATE outbox_events
                SET retry_count = $2, status = 'pending', next_retry_at = $3,
                    claimed_at = NULL, last_error = $4
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(new_count as i32)
            .bind(next_retry_at)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            RetryOutcome::Rescheduled {
                retry_count: new_count,
                next_retry_at,
            }
        } else {
            sqlx::query(
                r#"
                UPDATE outbox_events
                SET status = 'failed', next_retry_at = NULL, claimed_at = NULL, last_error = $2
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(error)
            .execute(&mut *tx)
            .await?;

            RetryOutcome::Exhausted
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_failed_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE status = 'failed'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
