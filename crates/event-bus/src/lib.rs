//! Per-service event bus for the retail backend.
//!
//! This crate provides:
//! - [`EventEnvelope`], the immutable record every event travels in
//! - [`EventHistory`], a bounded log of recent envelopes for introspection
//! - [`EventBus`], in-process fan-out with isolated, non-blocking handlers
//! - [`bridge::BrokerBridge`], an optional relay to a cross-service broker
//!
//! Delivery is at-least-once; subscribers deduplicate on `event_id`.

pub mod bridge;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod history;
pub mod kinds;

pub use bridge::{
    BridgeConfig, BridgeStatsSnapshot, BridgeStatus, BrokerBridge, BrokerTransport,
    ConnectionState, EnvelopeStream, InMemoryBroker,
};
pub use bus::{EventBus, HandlerFailure, SubscriptionHandle, SubscriptionId, SubscriptionInfo};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId};
pub use error::{BrokerError, EventBusError, HandlerError, Result};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use history::{DEFAULT_HISTORY_CAPACITY, EventHistory};
