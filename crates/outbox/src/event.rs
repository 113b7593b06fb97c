use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::AggregateId;
use event_store::DomainEvent;

/// Default number of delivery attempts before an entry goes terminal.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for an outbox entry, distinct from the event id inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random outbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an outbox ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of an outbox entry.
///
/// Transitions are monotonic along `pending → processing → completed` or
/// `pending → processing → pending (retry) → … → failed`; `failed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    /// Returns the lowercase string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// Outcome of a retry bump on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The entry went back to `pending` and is gated until `next_retry_at`.
    Rescheduled {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Retries are exhausted; the entry is terminally `failed`.
    Exhausted,
}

/// Exponential backoff delay keyed on the retry count: `2^retry_count`
/// minutes. The exponent saturates at 30 so a large configured retry limit
/// cannot overflow the delay arithmetic.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::minutes(2_i64.pow(retry_count.min(30)))
}

/// A delivery-tracking record wrapping one domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique entry id (not the event id).
    pub id: OutboxId,

    /// Aggregate the wrapped event belongs to.
    pub aggregate_id: AggregateId,

    /// Event type of the wrapped event, for subscriber routing.
    pub event_type: String,

    /// The full domain event being delivered.
    pub event_data: DomainEvent,

    pub created_at: DateTime<Utc>,

    /// Set only when delivery succeeds.
    pub processed_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// When set, the entry is ineligible for dispatch until this instant.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When the current `processing` claim was taken. Once older than the
    /// claim lease the entry can be reclaimed back to `pending`.
    pub claimed_at: Option<DateTime<Utc>>,

    pub status: OutboxStatus,

    /// Most recent delivery error, kept for operator inspection.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Wraps a domain event in a fresh pending entry.
    pub fn new(event: DomainEvent, max_retries: u32) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            event_data: event,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            claimed_at: None,
            status: OutboxStatus::Pending,
            last_error: None,
        }
    }

    /// Whether the entry is eligible for dispatch at `now`: pending and past
    /// (or without) its backoff window.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_retry_at.is_none_or(|t| t <= now)
    }
}
