//! Optional relay between a service's local bus and a cross-service broker.
//!
//! Outbound: a wildcard subscription forwards every envelope *emitted by this
//! service* to the broker (topic = event type). Inbound: a supervisor task
//! consumes the configured topics and re-delivers foreign envelopes to the
//! local bus. Envelopes originating from this service are never re-delivered
//! locally, which keeps the relay loop-free.
//!
//! When the broker is unreachable the bridge stays in
//! [`ConnectionState::Disconnected`], counts outbound events as dropped and
//! retries with capped exponential backoff. Local dispatch is unaffected.

pub mod memory;
pub mod stats;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

use crate::bus::{EventBus, SubscriptionHandle};
use crate::envelope::EventEnvelope;
use crate::error::{BrokerError, HandlerError, Result};
use crate::handler::EventHandler;
use crate::kinds;

pub use memory::InMemoryBroker;
pub use stats::{BridgeStatsSnapshot, BridgeStatus, ConnectionState};
pub use transport::{BrokerTransport, EnvelopeStream};

use stats::BridgeStats;

/// Broker bridging settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub enabled: bool,
    /// Broker endpoints. Bridging stays off when this is empty.
    pub brokers: Vec<String>,
    /// Topics (event types) consumed from the broker.
    pub topics: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl BridgeConfig {
    /// Returns true if bridging is both enabled and has somewhere to connect.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.brokers.is_empty()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: Vec::new(),
            topics: Vec::new(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

struct Shared {
    service: String,
    transport: Arc<dyn BrokerTransport>,
    stats: BridgeStats,
    reconnect: Notify,
}

struct Running {
    outbound: SubscriptionHandle,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

/// Relays events between an [`EventBus`] and a [`BrokerTransport`].
pub struct BrokerBridge {
    bus: EventBus,
    config: BridgeConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl BrokerBridge {
    pub fn new(bus: EventBus, transport: Arc<dyn BrokerTransport>, config: BridgeConfig) -> Self {
        let shared = Arc::new(Shared {
            service: bus.service().to_string(),
            transport,
            stats: BridgeStats::default(),
            reconnect: Notify::new(),
        });
        Self {
            bus,
            config,
            shared,
            running: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_active()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.stats.state()
    }

    /// Connection flag and counters for the status endpoint.
    pub async fn status(&self) -> BridgeStatus {
        let state = self.state();
        BridgeStatus {
            transport: self.shared.transport.kind(),
            enabled: self.is_enabled(),
            connected: state == ConnectionState::Connected,
            state,
            stats: self.shared.stats.snapshot().await,
        }
    }

    /// Starts relaying. A no-op when bridging is not configured or the
    /// bridge is already running. Never fails because the broker is down.
    #[tracing::instrument(skip(self), fields(service = %self.shared.service))]
    pub async fn start(&self) -> Result<()> {
        if !self.config.is_active() {
            tracing::info!("broker bridging not configured, running local-only");
            return Ok(());
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let forwarder = Arc::new(Forwarder {
            shared: Arc::clone(&self.shared),
        });
        let outbound = self.bus.subscribe(kinds::WILDCARD, forwarder).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            self.bus.clone(),
            self.config.clone(),
            shutdown_rx,
        ));

        tracing::info!(brokers = ?self.config.brokers, topics = ?self.config.topics, "broker bridge started");
        *running = Some(Running {
            outbound,
            shutdown,
            supervisor,
        });
        Ok(())
    }

    /// Stops relaying and closes the broker connection.
    #[tracing::instrument(skip(self), fields(service = %self.shared.service))]
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.outbound.unsubscribe().await;
        let _ = running.shutdown.send(true);
        if let Err(err) = running.supervisor.await {
            tracing::error!(error = %err, "broker supervisor task failed");
        }
        tracing::info!("broker bridge stopped");
    }
}

/// Outbound half: forwards this service's own envelopes to the broker.
struct Forwarder {
    shared: Arc<Shared>,
}

#[async_trait]
impl EventHandler for Forwarder {
    fn name(&self) -> &str {
        "broker-bridge"
    }

    async fn handle(&self, envelope: EventEnvelope) -> std::result::Result<(), HandlerError> {
        let shared = &self.shared;
        if envelope.source_service() != shared.service {
            return Ok(());
        }

        if shared.stats.state() != ConnectionState::Connected {
            shared.stats.record_dropped();
            tracing::debug!(
                event_type = envelope.event_type(),
                "broker disconnected, event kept local"
            );
            return Ok(());
        }

        match shared.transport.publish(envelope.event_type(), &envelope).await {
            Ok(()) => shared.stats.record_published(),
            Err(err) => {
                tracing::warn!(
                    event_type = envelope.event_type(),
                    event_id = %envelope.event_id(),
                    error = %err,
                    "broker publish failed"
                );
                let unavailable = matches!(err, BrokerError::Unavailable(_));
                shared.stats.record_publish_failure(err.to_string()).await;
                if unavailable {
                    shared.stats.set_state(ConnectionState::Disconnected);
                    shared.reconnect.notify_one();
                }
            }
        }
        Ok(())
    }
}

enum ConsumeExit {
    Shutdown,
    Reconnect,
}

async fn supervise(
    shared: Arc<Shared>,
    bus: EventBus,
    config: BridgeConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.stats.set_state(ConnectionState::Connecting);
        shared.stats.record_connect_attempt();

        match shared.transport.connect().await {
            Ok(()) => {
                shared.stats.set_state(ConnectionState::Connected);
                tracing::info!(service = %shared.service, "broker connected");
                backoff = config.initial_backoff;

                let exit = consume(&shared, &bus, &config.topics, &mut shutdown).await;
                shared.stats.set_state(ConnectionState::Disconnected);
                if matches!(exit, ConsumeExit::Shutdown) {
                    break;
                }
            }
            Err(err) => {
                shared.stats.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    service = %shared.service,
                    error = %err,
                    retry_in_ms = backoff.as_millis() as u64,
                    "broker unavailable, running local-only"
                );
                shared.stats.record_error(err.to_string()).await;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.max_backoff);
    }

    shared.transport.disconnect().await;
    shared.stats.set_state(ConnectionState::Disconnected);
}

async fn consume(
    shared: &Shared,
    bus: &EventBus,
    topics: &[String],
    shutdown: &mut watch::Receiver<bool>,
) -> ConsumeExit {
    let mut stream = if topics.is_empty() {
        None
    } else {
        match shared.transport.subscribe(topics).await {
            Ok(stream) => Some(stream),
            Err(err) => {
                tracing::warn!(error = %err, "broker subscription failed");
                shared.stats.record_error(err.to_string()).await;
                return ConsumeExit::Reconnect;
            }
        }
    };

    loop {
        let next = async {
            match stream.as_mut() {
                Some(stream) => stream.next().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => return ConsumeExit::Shutdown,
            _ = shared.reconnect.notified() => return ConsumeExit::Reconnect,
            item = next => match item {
                Some(Ok(envelope)) => {
                    if envelope.source_service() != shared.service {
                        shared.stats.record_consumed();
                        bus.deliver(envelope).await;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "broker stream error");
                    shared.stats.record_error(err.to_string()).await;
                    return ConsumeExit::Reconnect;
                }
                None => {
                    tracing::info!(service = %shared.service, "broker stream closed");
                    return ConsumeExit::Reconnect;
                }
            }
        }
    }
}
