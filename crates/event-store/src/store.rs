use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AggregateId, DomainEvent, Result};

/// Core trait for event store implementations.
///
/// An event store is an append-only log: events are never mutated or deleted
/// once appended. All implementations must be thread-safe (Send + Sync), and
/// failures must propagate to the caller so a publish never silently loses an
/// event.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events to the store.
    ///
    /// The batch is atomic: either all entries become visible or none do.
    /// Appends are idempotent on `event_id` — an event whose id is already
    /// stored is skipped, so at-least-once retriggers upstream are harmless.
    async fn append(&self, events: Vec<DomainEvent>) -> Result<()>;

    /// Retrieves all events for one aggregate in ascending timestamp order.
    ///
    /// When `from_version` is given, only events whose `event_version` is
    /// greater than or equal to it are returned.
    async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        from_version: Option<&str>,
    ) -> Result<Vec<DomainEvent>>;

    /// Retrieves events of one type across all aggregates, ascending by
    /// timestamp, optionally starting from `from_timestamp` (inclusive).
    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<DomainEvent>>;

    /// Global ascending-timestamp scan, for audit and backfill.
    async fn get_all_events(
        &self,
        from_timestamp: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<DomainEvent>>;
}
