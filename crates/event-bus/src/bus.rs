//! Per-service publish/subscribe core.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::envelope::{EventEnvelope, EventId};
use crate::error::{EventBusError, Result};
use crate::handler::EventHandler;
use crate::history::{DEFAULT_HISTORY_CAPACITY, EventHistory};
use crate::kinds;

/// Identifier assigned to a registration, unique per bus.
pub type SubscriptionId = u64;

const FAILURE_LOG_CAPACITY: usize = 50;

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    event_type: String,
    handler: Arc<dyn EventHandler>,
}

/// Read-only view of one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub event_type: String,
    pub handler: String,
}

/// A handler failure recorded with the metadata of the event that caused it.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub event_type: String,
    pub event_id: EventId,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

struct Inner {
    service: String,
    registry: RwLock<Vec<Registration>>,
    history: RwLock<EventHistory>,
    next_id: AtomicU64,
    failures: Mutex<VecDeque<HandlerFailure>>,
    failure_count: AtomicU64,
}

impl Inner {
    async fn remove(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().await;
        let before = registry.len();
        registry.retain(|r| r.id != id);
        registry.len() != before
    }

    async fn record_failure(&self, failure: HandlerFailure) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_handler_failures_total").increment(1);

        let mut failures = self.failures.lock().await;
        if failures.len() >= FAILURE_LOG_CAPACITY {
            failures.pop_front();
        }
        failures.push_back(failure);
    }
}

/// In-process fan-out of domain events for a single service.
///
/// Cloning is cheap and every clone shares the same registry and history.
/// `emit` returns once every matching handler has been scheduled on the
/// tokio runtime; it never waits for handlers to finish, and a failing or
/// panicking handler affects neither the emitter nor other handlers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Creates a bus for `service` with the default history capacity.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_history_capacity(service, DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a bus retaining at most `capacity` envelopes of history.
    pub fn with_history_capacity(service: impl Into<String>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.into(),
                registry: RwLock::new(Vec::new()),
                history: RwLock::new(EventHistory::new(capacity)),
                next_id: AtomicU64::new(1),
                failures: Mutex::new(VecDeque::new()),
                failure_count: AtomicU64::new(0),
            }),
        }
    }

    /// Name stamped as `sourceService` on every envelope this bus emits.
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Registers a handler for `event_type` (or [`kinds::WILDCARD`]).
    ///
    /// Registering the same handler twice yields two subscriptions.
    #[tracing::instrument(skip(self, handler), fields(service = %self.inner.service, handler = handler.name()))]
    pub async fn subscribe(
        &self,
        event_type: impl Into<String> + std::fmt::Debug,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(EventBusError::InvalidEventType(event_type));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registry.write().await.push(Registration {
            id,
            event_type: event_type.clone(),
            handler,
        });
        tracing::debug!(subscription_id = id, "subscription registered");

        Ok(SubscriptionHandle {
            id,
            event_type,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Builds the dispatch table from a static `(event_type, handler)` list.
    ///
    /// Entries are registered in iteration order, which is also their
    /// dispatch order.
    pub async fn register<I, S>(&self, table: I) -> Result<Vec<SubscriptionHandle>>
    where
        I: IntoIterator<Item = (S, Arc<dyn EventHandler>)>,
        S: Into<String> + std::fmt::Debug,
    {
        let mut handles = Vec::new();
        for (event_type, handler) in table {
            handles.push(self.subscribe(event_type, handler).await?);
        }
        tracing::info!(
            service = %self.inner.service,
            subscriptions = handles.len(),
            "event handlers registered"
        );
        Ok(handles)
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id).await
    }

    /// Drops every subscription; used at service shutdown.
    pub async fn clear_subscriptions(&self) -> usize {
        let mut registry = self.inner.registry.write().await;
        let removed = registry.len();
        registry.clear();
        removed
    }

    /// Emits an event from this service.
    #[tracing::instrument(skip(self, data), fields(service = %self.inner.service))]
    pub async fn emit<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        data: &T,
    ) -> Result<EventEnvelope> {
        self.emit_inner(event_type, data, None).await
    }

    /// Emits an event tagged with a correlation ID (e.g. a saga execution).
    #[tracing::instrument(skip(self, data), fields(service = %self.inner.service))]
    pub async fn emit_with_correlation<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        data: &T,
        correlation_id: &str,
    ) -> Result<EventEnvelope> {
        self.emit_inner(event_type, data, Some(correlation_id.to_string()))
            .await
    }

    async fn emit_inner<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        data: &T,
        correlation_id: Option<String>,
    ) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::builder()
            .event_type(event_type)
            .source_service(self.inner.service.as_str())
            .correlation_id(correlation_id)
            .data(data)?
            .build()?;

        let scheduled = self.publish(envelope.clone()).await;
        metrics::counter!("events_emitted_total").increment(1);
        tracing::debug!(event_id = %envelope.event_id(), scheduled, "event emitted");

        Ok(envelope)
    }

    /// Dispatches an envelope produced elsewhere, keeping its original
    /// identity, timestamp and source. Returns the number of handlers
    /// scheduled.
    pub async fn deliver(&self, envelope: EventEnvelope) -> usize {
        metrics::counter!("events_delivered_total").increment(1);
        self.publish(envelope).await
    }

    async fn publish(&self, envelope: EventEnvelope) -> usize {
        self.inner.history.write().await.push(envelope.clone());

        // Snapshot so no lock is held while handlers run.
        let targets: Vec<Registration> = self
            .inner
            .registry
            .read()
            .await
            .iter()
            .filter(|r| kinds::matches(&r.event_type, envelope.event_type()))
            .cloned()
            .collect();

        for target in &targets {
            self.dispatch(target, envelope.clone());
        }
        targets.len()
    }

    fn dispatch(&self, target: &Registration, envelope: EventEnvelope) {
        let handler = Arc::clone(&target.handler);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let event_type = envelope.event_type().to_string();
            let event_id = envelope.event_id();

            let error = match AssertUnwindSafe(handler.handle(envelope))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "handler panicked".to_string(),
            };

            tracing::error!(
                service = %inner.service,
                handler = handler.name(),
                %event_type,
                %event_id,
                %error,
                "event handler failed"
            );
            inner
                .record_failure(HandlerFailure {
                    handler: handler.name().to_string(),
                    event_type,
                    event_id,
                    error,
                    failed_at: Utc::now(),
                })
                .await;
        });
    }

    /// Returns the most recent envelopes, oldest first.
    pub async fn history(&self, event_type: Option<&str>, limit: Option<usize>) -> Vec<EventEnvelope> {
        self.inner.history.read().await.recent(event_type, limit)
    }

    pub async fn history_len(&self) -> usize {
        self.inner.history.read().await.len()
    }

    /// Returns the registry contents in registration order.
    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .map(|r| SubscriptionInfo {
                id: r.id,
                event_type: r.event_type.clone(),
                handler: r.handler.name().to_string(),
            })
            .collect()
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Names of the handlers an event of `event_type` would reach, in
    /// dispatch order.
    pub async fn handlers_for(&self, event_type: &str) -> Vec<String> {
        self.inner
            .registry
            .read()
            .await
            .iter()
            .filter(|r| kinds::matches(&r.event_type, event_type))
            .map(|r| r.handler.name().to_string())
            .collect()
    }

    /// Total number of handler failures since the bus was created.
    pub fn handler_failures(&self) -> u64 {
        self.inner.failure_count.load(Ordering::Relaxed)
    }

    /// The most recent handler failures, oldest first.
    pub async fn recent_failures(&self) -> Vec<HandlerFailure> {
        self.inner.failures.lock().await.iter().cloned().collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("service", &self.inner.service)
            .finish_non_exhaustive()
    }
}

/// Capability to remove a subscription later.
///
/// Dropping the handle leaves the subscription in place.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    event_type: String,
    bus: Weak<Inner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Removes the subscription. Returns false if it was already removed or
    /// the bus no longer exists.
    pub async fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::handler_fn;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recording_handler(
        name: &str,
        tx: mpsc::UnboundedSender<(String, EventEnvelope)>,
    ) -> Arc<dyn EventHandler> {
        let label = name.to_string();
        handler_fn(name, move |envelope| {
            let tx = tx.clone();
            let label = label.clone();
            async move {
                let _ = tx.send((label, envelope));
                Ok(())
            }
        })
    }

    async fn recv(
        rx: &mut mpsc::UnboundedReceiver<(String, EventEnvelope)>,
    ) -> (String, EventEnvelope) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("handler was not invoked")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn emit_without_subscribers_records_history() {
        let bus = EventBus::new("product-service");
        let envelope = bus
            .emit("product.created", &serde_json::json!({ "id": "P1" }))
            .await
            .unwrap();

        assert_eq!(envelope.source_service(), "product-service");
        let history = bus.history(None, None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_id(), envelope.event_id());
    }

    #[tokio::test]
    async fn emit_reaches_matching_subscribers_only() {
        let bus = EventBus::new("inventory-service");
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe("sale.created", recording_handler("sales", tx.clone()))
            .await
            .unwrap();
        bus.subscribe("product.deleted", recording_handler("products", tx))
            .await
            .unwrap();

        bus.emit("sale.created", &serde_json::json!({ "sale_id": 1 }))
            .await
            .unwrap();

        let (name, envelope) = recv(&mut rx).await;
        assert_eq!(name, "sales");
        assert_eq!(envelope.event_type(), "sale.created");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_subscription_sees_every_event() {
        let bus = EventBus::new("audit-service");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(kinds::WILDCARD, recording_handler("audit", tx))
            .await
            .unwrap();

        bus.emit("a.created", &()).await.unwrap();
        bus.emit("b.deleted", &()).await.unwrap();

        let mut seen = vec![recv(&mut rx).await.1, recv(&mut rx).await.1];
        seen.sort_by(|a, b| a.event_type().cmp(b.event_type()));
        assert_eq!(seen[0].event_type(), "a.created");
        assert_eq!(seen[1].event_type(), "b.deleted");
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = EventBus::new("payment-service");
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe("payment.charged", recording_handler("first", tx.clone()))
            .await
            .unwrap();
        bus.subscribe(
            "payment.charged",
            handler_fn("broken", |_| async { Err(HandlerError::new("boom")) }),
        )
        .await
        .unwrap();
        bus.subscribe("payment.charged", recording_handler("third", tx))
            .await
            .unwrap();

        bus.emit("payment.charged", &()).await.unwrap();

        let mut names = vec![recv(&mut rx).await.0, recv(&mut rx).await.0];
        names.sort();
        assert_eq!(names, vec!["first", "third"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.handler_failures(), 1);
        let failures = bus.recent_failures().await;
        assert_eq!(failures[0].handler, "broken");
        assert_eq!(failures[0].event_type, "payment.charged");
        assert_eq!(failures[0].error, "boom");
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let bus = EventBus::new("returns-service");
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe(
            "return.created",
            handler_fn("panics", |_| async { panic!("handler bug") }),
        )
        .await
        .unwrap();
        bus.subscribe("return.created", recording_handler("ok", tx))
            .await
            .unwrap();

        bus.emit("return.created", &()).await.unwrap();
        assert_eq!(recv(&mut rx).await.0, "ok");

        // A later event still flows.
        bus.emit("return.created", &()).await.unwrap();
        assert_eq!(recv(&mut rx).await.0, "ok");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.handler_failures(), 2);
    }

    #[tokio::test]
    async fn dispatch_order_is_registration_order() {
        let bus = EventBus::new("customer-service");
        let noop = || handler_fn("noop", |_| async { Ok(()) });
        bus.register(vec![
            ("customer.created", handler_fn("first", |_| async { Ok(()) })),
            (kinds::WILDCARD, handler_fn("audit", |_| async { Ok(()) })),
            ("customer.deleted", noop()),
            ("customer.created", handler_fn("second", |_| async { Ok(()) })),
        ])
        .await
        .unwrap();

        assert_eq!(
            bus.handlers_for("customer.created").await,
            vec!["first", "audit", "second"]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handlers_start_in_registration_order() {
        let bus = EventBus::new("customer-service");
        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        let logging = |name: &'static str| {
            let started = Arc::clone(&started);
            handler_fn(name, move |_| {
                let started = Arc::clone(&started);
                async move {
                    started.lock().unwrap().push(name);
                    // Give the later handlers a chance to run first.
                    tokio::task::yield_now().await;
                    Ok(())
                }
            })
        };
        bus.register(vec![
            ("customer.created", logging("first")),
            (kinds::WILDCARD, logging("audit")),
            ("customer.deleted", logging("deleted")),
            ("customer.created", logging("second")),
        ])
        .await
        .unwrap();

        bus.emit("customer.created", &()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*started.lock().unwrap(), vec!["first", "audit", "second"]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new("expense-service");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus
            .subscribe("expense.created", recording_handler("expenses", tx))
            .await
            .unwrap();

        assert_eq!(bus.subscription_count().await, 1);
        assert!(handle.clone().unsubscribe().await);
        assert!(!handle.unsubscribe().await);
        assert_eq!(bus.subscription_count().await, 0);

        bus.emit("expense.created", &()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn list_subscriptions_reports_handler_names() {
        let bus = EventBus::new("purchase-service");
        bus.subscribe(
            "purchase.created",
            handler_fn("stock-in", |_| async { Ok(()) }),
        )
        .await
        .unwrap();

        let subs = bus.list_subscriptions().await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].event_type, "purchase.created");
        assert_eq!(subs[0].handler, "stock-in");
    }

    #[tokio::test]
    async fn empty_event_type_is_rejected() {
        let bus = EventBus::new("svc");
        let err = bus
            .subscribe("", handler_fn("x", |_| async { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::InvalidEventType(_)));
        assert!(bus.emit("", &()).await.is_err());
        assert_eq!(bus.history_len().await, 0);
    }

    #[tokio::test]
    async fn deliver_keeps_foreign_envelope_identity() {
        let bus = EventBus::new("sales-service");
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("inventory.reserve.response", recording_handler("sales", tx))
            .await
            .unwrap();

        let foreign = EventEnvelope::builder()
            .event_type("inventory.reserve.response")
            .source_service("inventory-service")
            .build()
            .unwrap();
        assert_eq!(bus.deliver(foreign.clone()).await, 1);

        let (_, received) = recv(&mut rx).await;
        assert_eq!(received, foreign);
        assert_eq!(bus.history(None, None).await[0].source_service(), "inventory-service");
    }

    #[tokio::test]
    async fn correlation_id_is_attached() {
        let bus = EventBus::new("svc");
        let envelope = bus
            .emit_with_correlation("saga.failed", &(), "exec-1")
            .await
            .unwrap();
        assert_eq!(envelope.correlation_id(), Some("exec-1"));
    }
}
