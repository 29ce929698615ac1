//! Reservation records and the outcomes of operations on them.

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId};
use serde::{Deserialize, Serialize};

/// A quantity of one product held by a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Lifecycle of a reservation. `Released` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-boxed hold against inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub items: Vec<ReservationItem>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ReservationStatus,
    /// When the record left `Active`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Saga execution (or other caller) that created the hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ReservationRecord {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// True if the hold is still active but its TTL has run out at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }

    /// Quantity of `product_id` held by this record, regardless of status.
    pub fn quantity_of(&self, product_id: &ProductId) -> u64 {
        self.items
            .iter()
            .filter(|item| &item.product_id == product_id)
            .map(|item| u64::from(item.quantity))
            .sum()
    }

    pub(crate) fn close(&mut self, status: ReservationStatus, at: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(at);
    }
}

/// Result of a release call. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// This call moved the record from active to released.
    Released,
    AlreadyReleased,
    AlreadyExpired,
    /// No record with that ID exists (never created, or already purged).
    NotFound,
}

impl ReleaseOutcome {
    /// True only for the call that actually changed the record.
    pub fn changed(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Active records moved to expired.
    pub expired: usize,
    /// Terminal records dropped after their retention window.
    pub purged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: Duration) -> ReservationRecord {
        let now = Utc::now();
        ReservationRecord {
            reservation_id: ReservationId::new(),
            items: vec![
                ReservationItem::new("P1", 2),
                ReservationItem::new("P2", 1),
                ReservationItem::new("P1", 3),
            ],
            created_at: now,
            expires_at: now + expires_in,
            status: ReservationStatus::Active,
            closed_at: None,
            correlation_id: None,
        }
    }

    #[test]
    fn quantity_sums_repeated_products() {
        let r = record(Duration::minutes(15));
        assert_eq!(r.quantity_of(&ProductId::new("P1")), 5);
        assert_eq!(r.quantity_of(&ProductId::new("P2")), 1);
        assert_eq!(r.quantity_of(&ProductId::new("P3")), 0);
    }

    #[test]
    fn due_only_when_active_and_past_expiry() {
        let mut r = record(Duration::seconds(1));
        let later = r.expires_at + Duration::milliseconds(1);
        let earlier = r.expires_at - Duration::milliseconds(1);

        assert!(r.is_due(later));
        assert!(r.is_due(r.expires_at));
        assert!(!r.is_due(earlier));

        r.close(ReservationStatus::Released, later);
        assert!(!r.is_due(later));
        assert!(r.status.is_terminal());
    }

    #[test]
    fn record_serializes_with_prefixed_id() {
        let r = record(Duration::minutes(15));
        let json = serde_json::to_value(&r).unwrap();
        assert!(json["reservation_id"].as_str().unwrap().starts_with("res-"));
        assert_eq!(json["status"], "active");
        assert!(json.get("closed_at").is_none());
        assert_eq!(json["items"][0]["product_id"], "P1");
    }
}
