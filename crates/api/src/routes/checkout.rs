//! Checkout saga trigger and execution history.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ExecutionId, ParseIdError};
use saga::{CheckoutReceipt, CheckoutRequest, SagaExecution};

use crate::context::ServiceContext;
use crate::error::ApiError;

/// POST /checkout: runs the checkout saga to completion.
///
/// The saga runs on its own task, so a client that disconnects mid-checkout
/// does not cut compensation short. A failed saga has already been
/// compensated by the time the response is written; the body carries the
/// failed step and any compensation errors.
#[tracing::instrument(skip(ctx, request), fields(sale_id = %request.sale_id))]
pub async fn create(
    State(ctx): State<Arc<ServiceContext>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>), ApiError> {
    let sagas = ctx.sagas().clone();
    let saga = ctx.checkout_saga();
    let receipt = tokio::spawn(async move { sagas.run(&saga, request).await })
        .await
        .map_err(|e| ApiError::Internal(format!("checkout task failed: {e}")))??;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /sagas: recent executions, oldest first.
pub async fn list(State(ctx): State<Arc<ServiceContext>>) -> Json<Vec<SagaExecution>> {
    Json(ctx.sagas().recent_executions().await)
}

/// GET /sagas/{id}: one execution with its journal.
#[tracing::instrument(skip(ctx))]
pub async fn get(
    State(ctx): State<Arc<ServiceContext>>,
    Path(id): Path<String>,
) -> Result<Json<SagaExecution>, ApiError> {
    let execution_id: ExecutionId = id
        .parse()
        .map_err(|e: ParseIdError| ApiError::BadRequest(e.to_string()))?;
    let execution = ctx
        .sagas()
        .execution(execution_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Saga execution {execution_id} not found")))?;
    Ok(Json(execution))
}
