use serde::{Deserialize, Serialize};

/// Identifier of the aggregate an event belongs to.
///
/// Aggregate ids are caller-supplied business identifiers (e.g. a bin id or
/// customer id), so this wraps a string rather than a UUID. The newtype keeps
/// them from being mixed up with other string-typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

impl AggregateId {
    /// Creates an aggregate ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AggregateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<AggregateId> for String {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_preserves_value() {
        let id = AggregateId::new("B1");
        assert_eq!(id.as_str(), "B1");
        assert_eq!(id.to_string(), "B1");
    }

    #[test]
    fn aggregate_id_equality() {
        assert_eq!(AggregateId::from("B1"), AggregateId::new("B1"));
        assert_ne!(AggregateId::from("B1"), AggregateId::from("B2"));
    }

    #[test]
    fn aggregate_id_serialization_roundtrip() {
        let id = AggregateId::new("route-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"route-42\"");
        let deserialized: AggregateId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
