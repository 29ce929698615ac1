use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::envelope::EventEnvelope;
use crate::error::BrokerError;

/// A stream of envelopes consumed from the broker.
pub type EnvelopeStream =
    Pin<Box<dyn Stream<Item = Result<EventEnvelope, BrokerError>> + Send>>;

/// Connection to a durable, cross-service message broker.
///
/// The bus never depends on this trait; only [`super::BrokerBridge`] does.
/// Topics are event type strings.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Short name of the transport for status reporting, e.g. `"in-memory"`.
    fn kind(&self) -> &'static str;

    /// Establishes (or re-establishes) the connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publishes an envelope to `topic`.
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BrokerError>;

    /// Starts consuming `topics`. The stream ends when the connection drops.
    async fn subscribe(&self, topics: &[String]) -> Result<EnvelopeStream, BrokerError>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self);
}
