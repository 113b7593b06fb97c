//! Saga pattern for multi-step operations with compensating actions.
//!
//! A [`Saga`] runs caller-supplied steps in order. Each successful step
//! records a compensating action; when a later step fails, the recorded
//! compensations run in strict reverse of completion order and the caller
//! gets the original step error back — never a compensation error.

pub mod error;
pub mod saga;

pub use error::{Result, SagaError, StepError};
pub use saga::Saga;
