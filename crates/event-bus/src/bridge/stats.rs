//! Connection state and throughput counters for the broker bridge.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Bridging is not configured; the service runs local-only.
    Disabled,
    Connecting,
    Connected,
    /// Broker unreachable; local dispatch continues while the bridge retries.
    Disconnected,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disabled => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            _ => ConnectionState::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disabled => "disabled",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub publish_failures: u64,
    pub dropped: u64,
    pub connect_attempts: u64,
    pub last_error: Option<String>,
}

/// Shape reported under `kafka` by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    /// Which [`super::BrokerTransport`] the bridge relays through.
    pub transport: &'static str,
    pub enabled: bool,
    pub connected: bool,
    pub state: ConnectionState,
    pub stats: BridgeStatsSnapshot,
}

impl BridgeStatus {
    /// Status of a service whose bridge over `transport` is not running.
    pub fn disabled(transport: &'static str) -> Self {
        Self {
            transport,
            enabled: false,
            connected: false,
            state: ConnectionState::Disabled,
            stats: BridgeStatsSnapshot::default(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BridgeStats {
    state: AtomicU8,
    published: AtomicU64,
    consumed: AtomicU64,
    publish_failures: AtomicU64,
    dropped: AtomicU64,
    connect_attempts: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl BridgeStats {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("broker_events_published_total").increment(1);
    }

    pub(crate) fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("broker_events_consumed_total").increment(1);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("broker_events_dropped_total").increment(1);
    }

    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) async fn record_publish_failure(&self, error: String) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("broker_publish_failures_total").increment(1);
        self.record_error(error).await;
    }

    pub(crate) async fn record_error(&self, error: String) {
        *self.last_error.write().await = Some(error);
    }

    pub(crate) async fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            last_error: self.last_error.read().await.clone(),
        }
    }
}
