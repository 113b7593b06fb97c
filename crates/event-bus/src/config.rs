//! Bus configuration loaded from environment variables.

use std::time::Duration;

/// Event bus configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE_NAME` — stamped into event metadata (default: `"event-bus"`)
/// - `OUTBOX_BATCH_SIZE` — max entries per drain pass (default: `50`)
/// - `OUTBOX_MAX_RETRIES` — delivery attempts before dead-letter (default: `3`)
/// - `OUTBOX_DRAIN_INTERVAL_MS` — periodic drain interval (default: `5000`)
/// - `OUTBOX_CLAIM_LEASE_MS` — how long a drain pass may hold a claimed entry
///   before it is reclaimed for redelivery (default: `300000`, five minutes)
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub service_name: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub drain_interval: Duration,
    pub claim_lease: Duration,
}

impl BusConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size),
            max_retries: std::env::var("OUTBOX_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            drain_interval: std::env::var("OUTBOX_DRAIN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_interval),
            claim_lease: std::env::var("OUTBOX_CLAIM_LEASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.claim_lease),
        }
    }

    /// Overrides the service name stamped into event metadata.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: "event-bus".to_string(),
            batch_size: 50,
            max_retries: outbox::DEFAULT_MAX_RETRIES,
            drain_interval: Duration::from_millis(5000),
            claim_lease: Duration::from_millis(300_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = BusConfig::default();
        assert_eq!(config.service_name, "event-bus");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.drain_interval, Duration::from_millis(5000));
        assert_eq!(config.claim_lease, Duration::from_millis(300_000));
    }

    #[test]
    fn test_with_service_name() {
        let config = BusConfig::default().with_service_name("waste-mgmt");
        assert_eq!(config.service_name, "waste-mgmt");
        assert_eq!(config.batch_size, 50);
    }
}
