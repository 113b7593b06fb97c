use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::{
    OutboxError, OutboxEvent, OutboxId, OutboxStatus, Result, RetryOutcome,
    event::backoff_delay,
    store::OutboxStore,
};

/// In-memory outbox store implementation for development and testing.
///
/// Entries live in insertion order behind one lock, so a claim pass observes
/// and transitions them atomically with respect to other passes.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    entries: Arc<RwLock<Vec<OutboxEvent>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry with the given id, if any.
    pub async fn get(&self, id: OutboxId) -> Option<OutboxEvent> {
        self.entries.read().await.iter().find(|e| e.id == id).cloned()
    }

    /// Returns the total number of entries.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns a copy of every entry in insertion order, regardless of
    /// status. Test helper: completed entries are not reachable through the
    /// trait queries.
    pub async fn snapshot(&self) -> Vec<OutboxEvent> {
        self.entries.read().await.clone()
    }

    /// Clears the backoff gate on all pending entries, making them
    /// immediately due. Test helper: backoff windows are minutes long.
    pub async fn clear_backoff(&self) {
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            if entry.status == OutboxStatus::Pending {
                entry.next_retry_at = None;
            }
        }
    }

    /// Removes all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, events: Vec<OutboxEvent>) -> Result<()> {
        self.entries.write().await.extend(events);
        Ok(())
    }

    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.is_due(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let mut claimed = Vec::new();
        for entry in entries.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            if entry.is_due(now) {
                entry.status = OutboxStatus::Processing;
                entry.claimed_at = Some(now);
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn reclaim_stale(&self, lease: Duration) -> Result<usize> {
        let cutoff = Utc::now() - lease;
        let mut entries = self.entries.write().await;
        let mut reclaimed = 0;
        for entry in entries.iter_mut() {
            if entry.status == OutboxStatus::Processing
                && entry.claimed_at.is_some_and(|t| t <= cutoff)
            {
                entry.status = OutboxStatus::Pending;
                entry.claimed_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn mark_processed(&self, ids: &[OutboxId]) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut() {
            if ids.contains(&entry.id) && entry.status != OutboxStatus::Failed {
                entry.status = OutboxStatus::Completed;
                entry.processed_at = Some(now);
                entry.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        entry.status = OutboxStatus::Failed;
        entry.last_error = Some(error.to_string());
        entry.claimed_at = None;
        Ok(())
    }

    async fn increment_retry(&self, id: OutboxId, error: &str) -> Result<RetryOutcome> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;

        // Failed is terminal: never resurrected.
        if entry.status == OutboxStatus::Failed {
            return Ok(RetryOutcome::Exhausted);
        }

        entry.last_error = Some(error.to_string());
        entry.claimed_at = None;

        if entry.retry_count + 1 < entry.max_retries {
            entry.retry_count += 1;
            entry.status = OutboxStatus::Pending;
            let next_retry_at = Utc::now() + backoff_delay(entry.retry_count);
            entry.next_retry_at = Some(next_retry_at);
            Ok(RetryOutcome::Rescheduled {
                retry_count: entry.retry_count,
                next_retry_at,
            })
        } else {
            entry.status = OutboxStatus::Failed;
            entry.next_retry_at = None;
            Ok(RetryOutcome::Exhausted)
        }
    }

    async fn get_failed_events(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed)
            .take(limit)
            .cloned()
            .collect())
    }
}
