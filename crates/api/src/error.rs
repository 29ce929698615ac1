//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reservations::ReservationError;
use saga::SagaFailure;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// The reservation store rejected the request.
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    /// A saga ran and failed; compensation has already happened.
    #[error(transparent)]
    Saga(Box<SagaFailure>),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl From<SagaFailure> for ApiError {
    fn from(failure: SagaFailure) -> Self {
        ApiError::Saga(Box::new(failure))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Reservation(err) => (StatusCode::BAD_REQUEST, error_body(err.to_string())),
            ApiError::Saga(failure) => saga_failure_to_response(&failure),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg))
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn saga_failure_to_response(failure: &SagaFailure) -> (StatusCode, serde_json::Value) {
    let status = if failure.compensated() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        // Compensation left something behind that needs an operator.
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let compensation_errors: Vec<_> = failure
        .compensation_errors
        .iter()
        .map(|e| serde_json::json!({ "step": e.step, "attempts": e.attempts, "error": e.error.to_string() }))
        .collect();

    let body = serde_json::json!({
        "error": failure.error.to_string(),
        "saga_name": failure.saga_name,
        "execution_id": failure.execution_id,
        "failed_step": failure.failed_step,
        "state": failure.state,
        "compensated": failure.compensated(),
        "compensation_errors": compensation_errors,
    });
    (status, body)
}
