//! Reservation error types.

use common::ProductId;
use thiserror::Error;

/// Errors rejecting a reservation request.
///
/// Releasing or sweeping never fails: a missing or already-closed record is
/// reported through [`crate::ReleaseOutcome`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The request contained no items.
    #[error("Reservation must contain at least one item")]
    EmptyItems,

    /// An item asked for a non-positive quantity.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// The requested time-to-live cannot be used.
    #[error("Invalid reservation TTL: {0}")]
    InvalidTtl(String),
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
