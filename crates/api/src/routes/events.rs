//! Event introspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use event_bus::{EventEnvelope, SubscriptionInfo};
use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub subscriptions: Vec<SubscriptionInfo>,
    pub history: Vec<EventEnvelope>,
}

/// GET /events?type=&limit=: subscriptions and recent history, oldest first.
#[tracing::instrument(skip(ctx))]
pub async fn list(
    State(ctx): State<Arc<ServiceContext>>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let event_type = query.event_type.as_deref().filter(|t| !t.is_empty());
    Json(EventsResponse {
        subscriptions: ctx.bus().list_subscriptions().await,
        history: ctx.bus().history(event_type, query.limit).await,
    })
}
