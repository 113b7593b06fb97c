//! Durable staging area decoupling event creation from dispatch.
//!
//! Every published event gets one [`OutboxEvent`] tracking its delivery. This
//! crate is the only place retry, exponential backoff, and terminal-failure
//! logic live: an entry still inside its backoff window is never handed out,
//! and a `failed` entry is never resurrected.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{OutboxError, Result};
pub use event::{DEFAULT_MAX_RETRIES, OutboxEvent, OutboxId, OutboxStatus, RetryOutcome};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::OutboxStore;
