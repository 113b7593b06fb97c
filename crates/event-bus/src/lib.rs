//! Reliable event publication over a transactional outbox.
//!
//! `publish` appends an event to the event store (audit/replay) and stages a
//! pending outbox entry, then attempts immediate dispatch to in-process
//! subscribers; a periodic background drain re-delivers anything still
//! pending after a crash or a failed attempt. Delivery is at-least-once:
//! subscribers must tolerate duplicates.

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;

pub use bus::{EventBus, SubscriptionId};
pub use config::BusConfig;
pub use error::{EventBusError, Result};
pub use handler::{EventHandler, HandlerError};
