//! Application configuration loaded from environment variables.

use std::time::Duration;

use event_bus::{BridgeConfig, DEFAULT_HISTORY_CAPACITY};
use reservations::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `SERVICE_NAME`: name stamped on emitted envelopes (default: `"inventory-service"`)
/// - `KAFKA_ENABLED`: turn broker bridging on (default: `false`)
/// - `KAFKA_BROKERS`: comma-separated broker endpoints (default: none)
/// - `RESERVATION_TTL_MINUTES`: default hold lifetime (default: `15`)
/// - `RESERVATION_SWEEP_INTERVAL_SECS`: expiry sweep period (default: `60`)
/// - `EVENT_HISTORY_CAPACITY`: envelopes kept for introspection (default: `100`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub service_name: String,
    pub kafka_enabled: bool,
    pub kafka_brokers: Vec<String>,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub event_history_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to the default for that key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            service_name: lookup("SERVICE_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.service_name),
            kafka_enabled: lookup("KAFKA_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.kafka_enabled),
            kafka_brokers: lookup("KAFKA_BROKERS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            reservation_ttl: parsed("RESERVATION_TTL_MINUTES")
                .filter(|m| *m > 0)
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.reservation_ttl),
            sweep_interval: parsed("RESERVATION_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            event_history_capacity: parsed("EVENT_HISTORY_CAPACITY")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.event_history_capacity),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Bridge settings. Bridging stays off unless enabled *and* at least one
    /// broker endpoint is configured.
    pub fn bridge_config(&self, topics: Vec<String>) -> BridgeConfig {
        BridgeConfig {
            enabled: self.kafka_enabled,
            brokers: self.kafka_brokers.clone(),
            topics,
            ..BridgeConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            service_name: "inventory-service".to_string(),
            kafka_enabled: false,
            kafka_brokers: Vec::new(),
            reservation_ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
