use async_trait::async_trait;

use common::TraceContext;
use event_store::DomainEvent;

/// Error type returned by subscriber handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// An in-process subscriber for one event type.
///
/// Delivery is at-least-once: the same event may arrive more than once (a
/// retried entry, or concurrent drain passes on a store without an atomic
/// claim), so handlers should be idempotent. A returned error makes the bus
/// schedule a retry for the underlying outbox entry.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event. `trace` is derived from the metadata the event was
    /// published with, for correlating subscriber work with the original
    /// request.
    async fn handle(
        &self,
        event: &DomainEvent,
        trace: &TraceContext,
    ) -> std::result::Result<(), HandlerError>;
}
