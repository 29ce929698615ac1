//! Reservation endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ParseIdError, ReservationId};
use reservations::{ReleaseOutcome, ReservationItem, ReservationRecord};
use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub items: Vec<ReservationItem>,
    /// Hold lifetime; the configured default when absent.
    pub ttl_secs: Option<u64>,
    pub correlation_id: Option<String>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub reservation_id: ReservationId,
    pub outcome: ReleaseOutcome,
}

/// POST /reservations: places a hold.
#[tracing::instrument(skip(ctx, request))]
pub async fn create(
    State(ctx): State<Arc<ServiceContext>>,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationRecord>), ApiError> {
    let record = ctx
        .reservations()
        .reserve_correlated(
            request.items,
            request.ttl_secs.map(Duration::from_secs),
            request.correlation_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /reservations/{id}
#[tracing::instrument(skip(ctx))]
pub async fn get(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationRecord>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    ctx.reservations()
        .get(reservation_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reservation {id} not found")))
}

/// POST /reservations/{id}/release: idempotent; unknown IDs report `not_found`.
#[tracing::instrument(skip(ctx))]
pub async fn release(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let reservation_id = parse_reservation_id(&id)?;
    let outcome = ctx.reservations().release(reservation_id).await;
    Ok(Json(ReleaseResponse {
        reservation_id,
        outcome,
    }))
}

fn parse_reservation_id(id: &str) -> Result<ReservationId, ApiError> {
    id.parse()
        .map_err(|e: ParseIdError| ApiError::BadRequest(e.to_string()))
}
