use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{AggregateId, TraceContext};

/// Schema version stamped on events when the publisher does not specify one.
pub const DEFAULT_EVENT_VERSION: &str = "1.0";

/// Unique identifier for a domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Optional tracing/provenance metadata carried on every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Name of the service that published the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl EventMetadata {
    /// Builds metadata from a trace context and the publishing service name.
    pub fn from_trace(trace: &TraceContext, service: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace.trace_id.clone()),
            span_id: Some(trace.span_id.clone()),
            service: Some(service.into()),
        }
    }

    /// Reconstructs a trace context from stored metadata, if one was stamped.
    pub fn trace_context(&self) -> Option<TraceContext> {
        match (&self.trace_id, &self.span_id) {
            (Some(trace_id), Some(span_id)) => Some(TraceContext::new(trace_id, span_id)),
            _ => None,
        }
    }
}

/// A fact that has already happened, as published to the event log.
///
/// This is the stable wire shape consumed downstream: the payload is
/// immutable once published and the envelope is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique identifier, generated at publish time.
    pub event_id: EventId,

    /// String discriminator (e.g. "bin.created").
    pub event_type: String,

    /// Schema version of the payload (e.g. "1.0").
    pub event_version: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The kind of the owning entity (e.g. "bin", "route").
    pub aggregate_type: String,

    /// When the event was published (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,

    /// Event-type-specific structured data.
    pub payload: serde_json::Value,

    /// Trace ids and originating service.
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl DomainEvent {
    /// Creates a new domain event builder.
    pub fn builder() -> DomainEventBuilder {
        DomainEventBuilder::default()
    }
}

/// Builder for constructing domain events.
#[derive(Debug, Default)]
pub struct DomainEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    event_version: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: EventMetadata,
}

impl DomainEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the schema version. Defaults to [`DEFAULT_EVENT_VERSION`].
    pub fn event_version(mut self, version: impl Into<String>) -> Self {
        self.event_version = Some(version.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: impl Into<AggregateId>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the full metadata block.
    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds the domain event.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_id, aggregate_type,
    /// payload) are not set.
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            event_version: self
                .event_version
                .unwrap_or_else(|| DEFAULT_EVENT_VERSION.to_string()),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn builder_defaults_version_and_timestamp() {
        let before = Utc::now();
        let event = DomainEvent::builder()
            .event_type("bin.created")
            .aggregate_id("B1")
            .aggregate_type("bin")
            .payload(serde_json::json!({"capacity": 240}))
            .build();

        assert_eq!(event.event_version, DEFAULT_EVENT_VERSION);
        assert!(event.timestamp >= before);
        assert_eq!(event.aggregate_id, AggregateId::new("B1"));
    }

    #[test]
    fn metadata_trace_roundtrip() {
        let trace = TraceContext::new("t-1", "s-1");
        let metadata = EventMetadata::from_trace(&trace, "waste-mgmt");

        assert_eq!(metadata.service.as_deref(), Some("waste-mgmt"));
        assert_eq!(metadata.trace_context(), Some(trace));
    }

    #[test]
    fn metadata_trace_context_requires_both_ids() {
        let metadata = EventMetadata {
            trace_id: Some("t-1".to_string()),
            span_id: None,
            service: None,
        };
        assert!(metadata.trace_context().is_none());
    }

    #[test]
    fn wire_shape_omits_empty_metadata_fields() {
        let event = DomainEvent::builder()
            .event_type("bin.created")
            .aggregate_id("B1")
            .aggregate_type("bin")
            .payload(serde_json::json!({}))
            .build();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "bin.created");
        assert_eq!(json["metadata"], serde_json::json!({}));

        let back: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
