//! Service status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_bus::BridgeStatus;
use serde::Serialize;

use crate::context::ServiceContext;

#[derive(Serialize)]
pub struct ReservationSummary {
    pub active: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub subscriptions: usize,
    pub kafka: BridgeStatus,
    pub reservations: ReservationSummary,
    pub handler_failures: u64,
}

/// GET /status: bus, bridge and reservation summary.
#[tracing::instrument(skip(ctx))]
pub async fn get(State(ctx): State<Arc<ServiceContext>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: ctx.bus().service().to_string(),
        subscriptions: ctx.bus().subscription_count().await,
        kafka: ctx.bridge_status().await,
        reservations: ReservationSummary {
            active: ctx.reservations().active_count().await,
        },
        handler_failures: ctx.bus().handler_failures(),
    })
}
