//! External collaborators used by the checkout saga.

pub mod inventory;
pub mod payment;

pub use inventory::{InMemoryInventoryService, InventoryService};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
