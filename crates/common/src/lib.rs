//! Shared types used across the event delivery core.

pub mod trace;
pub mod types;

pub use trace::TraceContext;
pub use types::AggregateId;
