use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EventBusError, Result};

/// Unique identifier for an emitted event.
///
/// Delivery is at-least-once, so subscribers use this to drop duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A domain event as it travels through the bus and the broker.
///
/// Envelopes are immutable once built. Each subscriber receives its own
/// clone; nothing hands out a mutable reference.
///
/// Wire shape:
///
/// ```json
/// { "eventId": "…", "eventType": "inventory.reserve.response",
///   "data": { … }, "emittedAt": "2024-01-01T00:00:00Z",
///   "sourceService": "inventory-service", "correlationId": "…" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    event_id: EventId,
    event_type: String,
    data: serde_json::Value,
    emitted_at: DateTime<Utc>,
    source_service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl EventEnvelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the raw JSON payload.
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Decodes the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    data: Option<serde_json::Value>,
    emitted_at: Option<DateTime<Utc>>,
    source_service: Option<String>,
    correlation_id: Option<String>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn data_raw(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the emission time. If not set, the current time will be used.
    pub fn emitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.emitted_at = Some(at);
        self
    }

    pub fn source_service(mut self, service: impl Into<String>) -> Self {
        self.source_service = Some(service.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Builds the envelope.
    ///
    /// `event_type` and `source_service` are required; a missing payload
    /// becomes JSON `null`.
    pub fn build(self) -> Result<EventEnvelope> {
        let event_type = self
            .event_type
            .ok_or(EventBusError::MissingField("event_type"))?;
        if event_type.trim().is_empty() {
            return Err(EventBusError::InvalidEventType(event_type));
        }

        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type,
            data: self.data.unwrap_or(serde_json::Value::Null),
            emitted_at: self.emitted_at.unwrap_or_else(Utc::now),
            source_service: self
                .source_service
                .ok_or(EventBusError::MissingField("source_service"))?,
            correlation_id: self.correlation_id,
        })
    }
}
