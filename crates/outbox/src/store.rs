use async_trait::async_trait;
use chrono::Duration;

use crate::{OutboxEvent, OutboxId, Result, RetryOutcome};

/// Core trait for outbox store implementations.
///
/// The outbox owns all retry, backoff, and terminal-failure bookkeeping. Two
/// invariants every implementation must hold: an entry inside its backoff
/// window is never handed out, and a `failed` entry is never resurrected.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts new entries in `pending` status with a zero retry count.
    async fn insert(&self, events: Vec<OutboxEvent>) -> Result<()>;

    /// Returns up to `limit` entries that are `pending` and past (or without)
    /// their backoff window, oldest first. Entries claimed by a drain pass
    /// (`processing`) are not visible here.
    async fn get_pending_events(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Atomically claims up to `limit` due pending entries for dispatch,
    /// transitioning them `pending → processing`.
    ///
    /// The transition is a single conditional write only one caller can win
    /// per entry, so concurrent drain passes (immediate dispatch racing the
    /// periodic timer) never pick up the same entry twice.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Returns `processing` entries whose claim is older than `lease` back to
    /// `pending`, clearing the claim timestamp.
    ///
    /// A claim normally resolves to `completed`, a retry, or `failed` within
    /// one drain pass; one that outlives its lease was stranded by a crash or
    /// a failed bookkeeping write. Returns the number of entries reclaimed.
    async fn reclaim_stale(&self, lease: Duration) -> Result<usize>;

    /// Marks entries as successfully delivered: `completed`, with
    /// `processed_at` set to now. Terminal `failed` entries are left alone.
    async fn mark_processed(&self, ids: &[OutboxId]) -> Result<()>;

    /// Marks one entry terminally `failed`, recording the error.
    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()>;

    /// Bumps the retry bookkeeping for one entry after a delivery failure.
    ///
    /// If `retry_count + 1 < max_retries` the entry returns to `pending` with
    /// `retry_count` incremented and `next_retry_at = now + 2^retry_count`
    /// minutes (keyed on the new count). Otherwise the entry goes terminally
    /// `failed`. Calling this on an already-`failed` entry changes nothing
    /// and reports [`RetryOutcome::Exhausted`].
    async fn increment_retry(&self, id: OutboxId, error: &str) -> Result<RetryOutcome>;

    /// Returns up to `limit` terminally failed entries, oldest first, for
    /// dead-letter inspection.
    async fn get_failed_events(&self, limit: usize) -> Result<Vec<OutboxEvent>>;
}
