//! Stable event type identifiers other services depend on.

/// Matches every event type when used as a subscription type.
pub const WILDCARD: &str = "*";

pub const INVENTORY_CHECK_RESPONSE: &str = "inventory.check.response";
pub const INVENTORY_RESERVE_RESPONSE: &str = "inventory.reserve.response";
pub const INVENTORY_RELEASE_RESPONSE: &str = "inventory.release.response";

pub const SAGA_COMPLETED: &str = "saga.completed";
pub const SAGA_FAILED: &str = "saga.failed";

pub const SALE_CREATED: &str = "sale.created";
pub const PAYMENT_CHARGED: &str = "payment.charged";
pub const PAYMENT_REFUNDED: &str = "payment.refunded";

/// `<entity>.created`
pub fn created(entity: &str) -> String {
    format!("{entity}.created")
}

/// `<entity>.updated`
pub fn updated(entity: &str) -> String {
    format!("{entity}.updated")
}

/// `<entity>.deleted`
pub fn deleted(entity: &str) -> String {
    format!("{entity}.deleted")
}

/// Returns true if a subscription for `pattern` receives `event_type`.
pub fn matches(pattern: &str, event_type: &str) -> bool {
    pattern == WILDCARD || pattern == event_type
}
