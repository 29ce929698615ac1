//! Event bus error types.

use thiserror::Error;

/// Errors returned to callers of the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The event type string was empty.
    #[error("Invalid event type: {0:?}")]
    InvalidEventType(String),

    /// An envelope was built without a required field.
    #[error("Missing envelope field: {0}")]
    MissingField(&'static str),

    /// The event payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure raised by a subscriber while handling an event.
///
/// Handler failures never reach the emitter; the bus logs and counts them.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::with_source("event payload could not be decoded", err)
    }
}

/// Errors raised by a broker transport.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker cannot be reached. Recoverable; the bridge keeps retrying.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Publishing an event to a topic failed.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Subscribing to topics failed.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Any other transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
