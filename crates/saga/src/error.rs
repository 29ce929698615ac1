//! Saga error types.

use common::{ExecutionId, ProductId};
use reservations::ReservationError;
use thiserror::Error;

use crate::state::SagaState;

/// Failure raised by a step's `execute` or `compensate`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a step error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<SagaError> for StepError {
    fn from(err: SagaError) -> Self {
        StepError::with_source(err.to_string(), err)
    }
}

impl From<ReservationError> for StepError {
    fn from(err: ReservationError) -> Self {
        StepError::with_source(err.to_string(), err)
    }
}

/// A compensation that still failed after every allowed attempt.
#[derive(Debug, Error)]
#[error("compensation of step '{step}' failed after {attempts} attempt(s): {error}")]
pub struct CompensationError {
    pub step: String,
    pub attempts: u32,
    #[source]
    pub error: StepError,
}

/// Returned by `SagaManager::run` when a step fails.
///
/// `error` is always the step failure that triggered the unwind, never a
/// compensation error; those are listed in `compensation_errors`.
#[derive(Debug, Error)]
#[error("saga '{saga_name}' failed at step '{failed_step}': {error}")]
pub struct SagaFailure {
    pub saga_name: String,
    pub execution_id: ExecutionId,
    pub failed_step: String,
    #[source]
    pub error: StepError,
    /// Either `Compensated` or `CompensationFailed`.
    pub state: SagaState,
    pub compensation_errors: Vec<CompensationError>,
}

impl SagaFailure {
    /// True if every compensation succeeded.
    pub fn compensated(&self) -> bool {
        self.state == SagaState::Compensated
    }
}

/// Errors raised by the checkout collaborators.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The checkout request is malformed.
    #[error("Invalid checkout request: {0}")]
    Validation(String),

    /// Not enough unreserved stock for a product.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u64,
    },

    /// Inventory service error.
    #[error("Inventory service error: {0}")]
    InventoryService(String),

    /// Payment service error.
    #[error("Payment service error: {0}")]
    PaymentService(String),

    /// Reservation store rejected the hold.
    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),
}

/// Convenience type alias for saga collaborator results.
pub type Result<T> = std::result::Result<T, SagaError>;
