use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    AggregateId, DomainEvent, EventId, Result,
    store::EventStore,
};

#[derive(Default)]
struct Inner {
    events: Vec<DomainEvent>,
    seen_ids: HashSet<EventId>,
}

/// In-memory event store implementation for development and testing.
///
/// Stores all events in insertion order behind one lock, which gives the
/// batch-append atomicity the contract requires. Ties on timestamp resolve to
/// insertion order because sorting is stable.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.events.clear();
        inner.seen_ids.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<DomainEvent>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for event in events {
            // Idempotent on event_id: duplicates from upstream retries are skipped.
            if inner.seen_ids.insert(event.event_id) {
                inner.events.push(event);
            } else {
                tracing::debug!(event_id = %event.event_id, "skipping duplicate event");
            }
        }
        Ok(())
    }

    async fn get_events(
        &self,
        aggregate_id: &AggregateId,
        from_version: Option<&str>,
    ) -> Result<Vec<DomainEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| {
                &e.aggregate_id == aggregate_id
                    && from_version.is_none_or(|v| e.event_version.as_str() >= v)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn get_events_by_type(
        &self,
        event_type: &str,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<DomainEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| {
                e.event_type == event_type && from_timestamp.is_none_or(|t| e.timestamp >= t)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn get_all_events(
        &self,
        from_timestamp: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<DomainEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| from_timestamp.is_none_or(|t| e.timestamp >= t))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}
