//! Stock level endpoints backed by the in-memory inventory service.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub quantity: u64,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub product_id: ProductId,
    pub on_hand: u64,
    pub reserved: u64,
    pub available: u64,
}

/// PUT /inventory/{product_id}
#[tracing::instrument(skip(ctx, request))]
pub async fn set(
    State(ctx): State<Arc<ServiceContext>>,
    Path(product_id): Path<String>,
    Json(request): Json<SetStockRequest>,
) -> Json<StockResponse> {
    let product_id = ProductId::new(product_id);
    ctx.inventory()
        .set_stock(product_id.clone(), request.quantity)
        .await;
    Json(stock(&ctx, product_id).await)
}

/// GET /inventory/{product_id}: on hand minus active holds.
pub async fn get(
    State(ctx): State<Arc<ServiceContext>>,
    Path(product_id): Path<String>,
) -> Json<StockResponse> {
    Json(stock(&ctx, ProductId::new(product_id)).await)
}

async fn stock(ctx: &ServiceContext, product_id: ProductId) -> StockResponse {
    let on_hand = ctx.inventory().stock_of(&product_id).await;
    let reserved = ctx.reservations().reserved_quantity(&product_id).await;
    StockResponse {
        available: on_hand.saturating_sub(reserved),
        product_id,
        on_hand,
        reserved,
    }
}
