//! Subscriber handler trait and closure adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::error::HandlerError;

/// A subscriber reacting to events of one type.
///
/// Delivery is at-least-once: a handler may see the same `event_id` twice
/// (for example after a broker redelivery) and must tolerate it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name reported by `list_subscriptions` and in failure logs.
    fn name(&self) -> &str;

    /// Handles a single event.
    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(envelope).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
