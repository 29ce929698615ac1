//! Hosting service for the event bus, saga manager and reservation store.
//!
//! Wires a [`ServiceContext`] into an axum router with health, status and
//! event-introspection endpoints, the checkout saga trigger, reservation and
//! stock endpoints, and Prometheus metrics.

pub mod config;
pub mod context;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use context::ServiceContext;
pub use error::ApiError;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(ctx: Arc<ServiceContext>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/status", get(routes::status::get))
        .route("/events", get(routes::events::list))
        .route("/checkout", post(routes::checkout::create))
        .route("/sagas", get(routes::checkout::list))
        .route("/sagas/{id}", get(routes::checkout::get))
        .route("/reservations", post(routes::reservations::create))
        .route("/reservations/{id}", get(routes::reservations::get))
        .route(
            "/reservations/{id}/release",
            post(routes::reservations::release),
        )
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::get).put(routes::inventory::set),
        )
        .with_state(ctx)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
