use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, DomainEvent, EventId, Result,
    event::EventMetadata,
    store::EventStore,
};

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<DomainEvent> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: EventMetadata = serde_json::from_value(metadata_json)?;

        Ok(DomainEvent {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            aggregate_id: AggregateId::new(row.try_get::<String, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, event_type, event_version, aggregate_id, aggregate_type, timestamp, payload, metadata";

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<DomainEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        // One transaction per batch: all entries become visible or none do.
        let mut tx = self.pool.begin().await?;

        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            // ON CONFLICT DO NOTHING keeps the append idempotent on event_id.
            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, event_version, aggregate_id, aggregate_type, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(&event.event_version)
            .bind(event.aggregate_id.as_str())
            .bind(&event.aggregate_type)
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        from_version: Option<&str>,
    ) -> Result<Vec<DomainEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM events
            WHERE aggregate_id = $1
              AND ($2::text IS NULL OR event_version >= $2)
            ORDER BY timestamp ASC, sequence ASC
            "#,
        ))
        .bind(aggregate_id.as_str())
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<DomainEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM events
            WHERE event_type = $1
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
            ORDER BY timestamp ASC, sequence ASC
            "#,
        ))
        .bind(event_type)
        .bind(from_timestamp)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_all_events(
        &self,
        from_timestamp: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<DomainEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM events
            WHERE $1::timestamptz IS NULL OR timestamp >= $1
            ORDER BY timestamp ASC, sequence ASC
            LIMIT $2
            "#,
        ))
        .bind(from_timestamp)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}
