use event_store::EventStoreError;
use outbox::OutboxError;
use thiserror::Error;

use crate::handler::HandlerError;

/// Errors surfaced by the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The event store rejected a read or write.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The outbox store rejected a read or write.
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A replay handler failed; replay stops at the failing event.
    #[error("Replay handler failed: {0}")]
    Replay(#[source] HandlerError),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
