use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Propagated tracing identifiers stamped into event metadata.
///
/// Supplied by the caller's tracing layer at publish time; when an event is
/// dispatched later from the outbox, the context is rebuilt from the stored
/// metadata so subscribers can correlate their work with the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceContext {
    /// Creates a trace context with the given identifiers.
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        }
    }

    /// Creates a fresh root context with random identifiers.
    pub fn root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Derives a child context: same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().simple().to_string(),
        }
    }
}
