//! Shared identifier and value types used across the event, saga and
//! reservation crates.

pub mod types;

pub use types::{ExecutionId, Money, ParseIdError, ProductId, ReservationId};
