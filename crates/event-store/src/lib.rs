//! Append-only, queryable log of domain events, keyed by aggregate.
//!
//! Events are facts that have already happened: once appended they are never
//! mutated. The store supports per-aggregate retrieval in timestamp order
//! (for history and replay), cross-aggregate queries by event type, and a
//! global scan for audit and backfill.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{DomainEvent, DomainEventBuilder, EventId, EventMetadata};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::EventStore;
