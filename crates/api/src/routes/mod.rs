//! HTTP route handlers.

pub mod checkout;
pub mod events;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod reservations;
pub mod status;
