//! Per-process service context: owns the bus, the reservation store, the
//! saga manager and the optional broker bridge, and starts/stops the
//! background tasks that go with them.

use std::collections::BTreeSet;
use std::sync::Arc;

use event_bus::{
    BridgeStatus, BrokerBridge, BrokerTransport, EventBus, EventEnvelope, HandlerError,
    InMemoryBroker, handler_fn, kinds,
};
use reservations::{ReservationConfig, ReservationStore, ReservationSweeper};
use saga::{
    CheckoutReceipt, CheckoutRequest, CheckoutServices, InMemoryInventoryService,
    InMemoryPaymentService, SagaDefinition, SagaManager, checkout_saga,
};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::Config;

/// Payload of `product.created` / `product.updated` events that carry stock.
#[derive(Debug, Deserialize)]
struct ProductStock {
    product_id: String,
    stock: u64,
}

#[derive(Default)]
struct Background {
    bridge: Option<BrokerBridge>,
    sweeper: Option<ReservationSweeper>,
}

/// Everything one hosting service needs, created once in `main`.
pub struct ServiceContext {
    config: Config,
    bus: EventBus,
    reservations: ReservationStore,
    sagas: SagaManager,
    checkout: Arc<SagaDefinition<CheckoutRequest, CheckoutReceipt>>,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    transport: Arc<dyn BrokerTransport>,
    background: Mutex<Background>,
}

impl ServiceContext {
    /// Creates a context whose bridge (if enabled) talks to an in-process
    /// broker reporting the configured endpoints.
    pub fn new(config: Config) -> Self {
        let broker = InMemoryBroker::with_endpoints(config.kafka_brokers.clone());
        Self::with_transport(config, Arc::new(broker))
    }

    /// Creates a context bridged through `transport`.
    pub fn with_transport(config: Config, transport: Arc<dyn BrokerTransport>) -> Self {
        let bus = EventBus::with_history_capacity(
            config.service_name.clone(),
            config.event_history_capacity,
        );
        let reservations = ReservationStore::with_config(
            bus.clone(),
            ReservationConfig {
                default_ttl: config.reservation_ttl,
                ..ReservationConfig::default()
            },
        );
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let checkout = Arc::new(checkout_saga(CheckoutServices {
            inventory: Arc::new(inventory.clone()),
            payment: Arc::new(payment.clone()),
            reservations: reservations.clone(),
            bus: bus.clone(),
            reservation_ttl: Some(config.reservation_ttl),
        }));

        Self {
            sagas: SagaManager::new(bus.clone()),
            config,
            bus,
            reservations,
            checkout,
            inventory,
            payment,
            transport,
            background: Mutex::new(Background::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn reservations(&self) -> &ReservationStore {
        &self.reservations
    }

    pub fn sagas(&self) -> &SagaManager {
        &self.sagas
    }

    pub fn checkout_saga(&self) -> Arc<SagaDefinition<CheckoutRequest, CheckoutReceipt>> {
        Arc::clone(&self.checkout)
    }

    pub fn inventory(&self) -> &InMemoryInventoryService {
        &self.inventory
    }

    pub fn payment(&self) -> &InMemoryPaymentService {
        &self.payment
    }

    /// Registers the dispatch table, starts the expiry sweeper and, when
    /// configured, the broker bridge. Calling it twice is a no-op.
    ///
    /// Bridge topics are the event types this service subscribes to, so
    /// every handler registered before `start` also hears other services.
    #[tracing::instrument(skip(self), fields(service = %self.config.service_name))]
    pub async fn start(&self) -> event_bus::Result<()> {
        let mut background = self.background.lock().await;
        if background.sweeper.is_some() {
            return Ok(());
        }

        self.bus.register(self.dispatch_table()).await?;

        let bridge = BrokerBridge::new(
            self.bus.clone(),
            Arc::clone(&self.transport),
            self.config.bridge_config(self.bridge_topics().await),
        );
        bridge.start().await?;

        background.bridge = Some(bridge);
        background.sweeper = Some(ReservationSweeper::spawn(
            self.reservations.clone(),
            self.config.sweep_interval,
        ));
        tracing::info!("service context started");
        Ok(())
    }

    /// Stops the bridge and the sweeper and clears the dispatch table, so a
    /// later `start` begins from scratch. Safe to call without `start`.
    #[tracing::instrument(skip(self), fields(service = %self.config.service_name))]
    pub async fn stop(&self) {
        let mut background = self.background.lock().await;
        if let Some(bridge) = background.bridge.take() {
            bridge.stop().await;
        }
        if let Some(sweeper) = background.sweeper.take() {
            sweeper.stop().await;
            self.bus.clear_subscriptions().await;
        }
        tracing::info!("service context stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.sweeper.is_some()
    }

    /// Bridge status for the status endpoint; disabled before `start`.
    pub async fn bridge_status(&self) -> BridgeStatus {
        match &self.background.lock().await.bridge {
            Some(bridge) => bridge.status().await,
            None => BridgeStatus::disabled(self.transport.kind()),
        }
    }

    async fn bridge_topics(&self) -> Vec<String> {
        let topics: BTreeSet<String> = self
            .bus
            .list_subscriptions()
            .await
            .into_iter()
            .map(|s| s.event_type)
            .filter(|t| t != kinds::WILDCARD)
            .collect();
        topics.into_iter().collect()
    }

    fn dispatch_table(&self) -> Vec<(String, Arc<dyn event_bus::EventHandler>)> {
        let sync_stock = {
            let inventory = self.inventory.clone();
            handler_fn("product_stock_sync", move |envelope: EventEnvelope| {
                let inventory = inventory.clone();
                async move {
                    let product: ProductStock = envelope
                        .data_as()
                        .map_err(|e| HandlerError::with_source("invalid product payload", e))?;
                    inventory.set_stock(product.product_id, product.stock).await;
                    Ok::<(), HandlerError>(())
                }
            })
        };

        let log_saga_failure = handler_fn("saga_failure_log", |envelope: EventEnvelope| async move {
            tracing::warn!(
                event_id = %envelope.event_id(),
                saga_name = %envelope.data()["saga_name"],
                failed_step = %envelope.data()["failed_step"],
                compensated = %envelope.data()["compensated"],
                "saga failed"
            );
            Ok::<(), HandlerError>(())
        });

        vec![
            (kinds::created("product"), Arc::clone(&sync_stock)),
            (kinds::updated("product"), sync_stock),
            (kinds::SAGA_FAILED.to_string(), log_saga_failure),
        ]
    }
}
