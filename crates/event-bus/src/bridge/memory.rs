//! In-process broker transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::transport::{BrokerTransport, EnvelopeStream};
use crate::envelope::EventEnvelope;
use crate::error::BrokerError;
use crate::kinds;

const CHANNEL_CAPACITY: usize = 1024;

struct BrokerInner {
    tx: broadcast::Sender<EventEnvelope>,
    available: AtomicBool,
    published: AtomicU64,
    endpoints: Vec<String>,
}

/// Broker transport backed by a tokio broadcast channel.
///
/// Clones share one channel, so several service buses in the same process
/// can exchange events through it. Availability can be toggled to exercise
/// the bridge's local-only fallback and reconnection.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_endpoints(Vec::new())
    }

    /// Creates a broker that reports the configured endpoints.
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BrokerInner {
                tx,
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
                endpoints,
            }),
        }
    }

    /// Makes the broker reachable or unreachable for new operations.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Number of envelopes accepted by `publish`.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.inner.endpoints
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker offline".to_string()))
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn kind(&self) -> &'static str {
        "in-memory"
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.ensure_available()
    }

    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BrokerError> {
        self.ensure_available()?;
        if topic != envelope.event_type() {
            return Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: format!("topic does not match event type {}", envelope.event_type()),
            });
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is not an error for a broker: the message is simply unconsumed.
        let _ = self.inner.tx.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<EnvelopeStream, BrokerError> {
        self.ensure_available()?;
        let rx = self.inner.tx.subscribe();
        let topics = topics.to_vec();
        let inner = Arc::clone(&self.inner);

        let stream = futures_util::stream::unfold(
            (rx, topics, inner),
            |(mut rx, topics, inner)| async move {
                loop {
                    match rx.recv().await {
                        Ok(envelope) => {
                            if !inner.available.load(Ordering::SeqCst) {
                                return None;
                            }
                            if topics.iter().any(|t| kinds::matches(t, envelope.event_type())) {
                                return Some((Ok(envelope), (rx, topics, inner)));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "in-memory broker consumer lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn disconnect(&self) {}
}
