use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{events::DEFAULT_SUBSCRIBER_CAPACITY, EngineError, Result};

/// Top-level configuration structure for the engine and its host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub clock: ClockConfig,
    pub scheduler: SchedulerConfig,
    pub events: EventsConfig,
    pub driver: DriverConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Decodes a JSON document. Missing fields fall back to defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(EngineError::Config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// Configuration specific to the playback clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Permit negative playback rates. When off they clamp to zero.
    pub allow_reverse: bool,
}

/// Configuration specific to command scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Scaled values closer than this to the last sent value are not resent.
    pub dedup_epsilon: f64,
    /// Minimum gap between commands to one actuator when the device
    /// advertises nothing.
    pub default_min_interval_ms: u64,
    /// Hand intents to the transport as one batch per tick when it allows.
    pub prefer_batching: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dedup_epsilon: 1e-3,
            default_min_interval_ms: 50,
            prefer_batching: true,
        }
    }
}

impl SchedulerConfig {
    pub fn default_min_interval(&self) -> Duration {
        Duration::from_millis(self.default_min_interval_ms)
    }
}

/// Configuration for observability subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events each subscriber may buffer before further ones are dropped.
    pub subscriber_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Settings for a host that drives ticks at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub tick_rate_hz: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { tick_rate_hz: 60 }
    }
}

impl DriverConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config = AppConfig::from_json(r#"{"scheduler": {"default_min_interval_ms": 100}}"#)
            .unwrap();
        assert_eq!(
            config.scheduler.default_min_interval(),
            Duration::from_millis(100)
        );
        assert_eq!(config.scheduler.dedup_epsilon, 1e-3);
        assert!(!config.clock.allow_reverse);
        assert_eq!(config.driver.tick_rate_hz, 60);
        assert_eq!(config.events.subscriber_capacity, DEFAULT_SUBSCRIBER_CAPACITY);
    }

    #[test]
    fn subscriber_capacity_is_configurable() {
        let config = AppConfig::from_json(r#"{"events": {"subscriber_capacity": 8}}"#).unwrap();
        assert_eq!(config.events.subscriber_capacity, 8);
    }

    #[test]
    fn rejects_malformed_documents() {
        let err = AppConfig::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn tick_interval_never_divides_by_zero() {
        let driver = DriverConfig { tick_rate_hz: 0 };
        assert_eq!(driver.tick_interval(), Duration::from_secs(1));
    }
}
