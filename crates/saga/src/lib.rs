//! Saga orchestration for multi-service workflows.
//!
//! A saga is an ordered list of [`Step`]s, each with an optional
//! compensating action. [`SagaManager::run`] executes the steps in order,
//! threading each step's output into the next. If a step fails, the steps
//! that already succeeded are compensated in reverse order (best effort)
//! and the original failure is returned to the caller. Every run ends with
//! a `saga.completed` or `saga.failed` event on the service's bus.
//!
//! The [`checkout`] module builds the retail checkout saga:
//! 1. Validate the request
//! 2. Reserve inventory
//! 3. Charge payment
//! 4. Confirm the sale

pub mod checkout;
pub mod definition;
pub mod error;
pub mod events;
pub mod manager;
pub mod services;
pub mod state;
pub mod step;

pub use checkout::{
    CheckoutItem, CheckoutReceipt, CheckoutRequest, CheckoutServices, checkout_saga,
};
pub use definition::SagaDefinition;
pub use error::{CompensationError, SagaError, SagaFailure, StepError};
pub use events::SagaEvent;
pub use manager::{RetryPolicy, SagaExecution, SagaManager};
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InventoryService, PaymentResult,
    PaymentService,
};
pub use state::SagaState;
pub use step::Step;
