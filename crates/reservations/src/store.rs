//! Guarded map of reservation records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{ProductId, ReservationId};
use event_bus::{EventBus, kinds};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::error::{ReservationError, Result};
use crate::record::{
    ReleaseOutcome, ReservationItem, ReservationRecord, ReservationStatus, SweepReport,
};

/// Default time-to-live of a hold.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default time a released or expired record stays queryable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Store-wide settings.
#[derive(Debug, Clone, Copy)]
pub struct ReservationConfig {
    /// TTL used when `reserve` is called without one.
    pub default_ttl: Duration,
    /// How long terminal records are kept before a sweep purges them.
    pub retention: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            retention: DEFAULT_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CloseReason {
    Released,
    Expired,
}

#[derive(Serialize)]
struct ReserveResponse<'a> {
    success: bool,
    reservation_id: ReservationId,
    items: &'a [ReservationItem],
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ReleaseResponse<'a> {
    success: bool,
    reservation_id: ReservationId,
    items: &'a [ReservationItem],
    reason: CloseReason,
}

/// Time-boxed inventory holds shared by saga steps and the sweeper.
///
/// Every status change is a compare-and-set under the write lock, so of two
/// concurrent calls touching the same record exactly one moves it out of
/// `Active`; the other observes the terminal state. Events are emitted after
/// the lock is released, and only by the call that changed the record.
#[derive(Clone)]
pub struct ReservationStore {
    records: Arc<RwLock<HashMap<ReservationId, ReservationRecord>>>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl ReservationStore {
    /// Creates a store using wall-clock time and the default settings.
    pub fn new(bus: EventBus) -> Self {
        Self::with_clock(bus, ReservationConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(bus: EventBus, config: ReservationConfig) -> Self {
        Self::with_clock(bus, config, Arc::new(SystemClock))
    }

    pub fn with_clock(bus: EventBus, config: ReservationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            bus,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Places a hold on `items` for `ttl` (or the default TTL).
    ///
    /// Stock availability is not checked here; callers check it first.
    pub async fn reserve(
        &self,
        items: Vec<ReservationItem>,
        ttl: Option<Duration>,
    ) -> Result<ReservationRecord> {
        self.reserve_correlated(items, ttl, None).await
    }

    /// Like [`reserve`](Self::reserve), tagging the record and its events with
    /// a correlation ID.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve_correlated(
        &self,
        items: Vec<ReservationItem>,
        ttl: Option<Duration>,
        correlation_id: Option<String>,
    ) -> Result<ReservationRecord> {
        validate_items(&items)?;
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(ReservationError::InvalidTtl("TTL must be positive".to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| ReservationError::InvalidTtl(err.to_string()))?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| ReservationError::InvalidTtl("TTL out of range".to_string()))?;

        let record = ReservationRecord {
            reservation_id: ReservationId::new(),
            items,
            created_at: now,
            expires_at,
            status: ReservationStatus::Active,
            closed_at: None,
            correlation_id,
        };
        self.records
            .write()
            .await
            .insert(record.reservation_id, record.clone());

        metrics::counter!("reservations_created").increment(1);
        tracing::info!(
            reservation_id = %record.reservation_id,
            expires_at = %record.expires_at,
            "reservation created"
        );

        let response = ReserveResponse {
            success: true,
            reservation_id: record.reservation_id,
            items: &record.items,
            expires_at: record.expires_at,
        };
        self.publish(
            kinds::INVENTORY_RESERVE_RESPONSE,
            &response,
            record.correlation_id.as_deref(),
        )
        .await;

        Ok(record)
    }

    /// Releases a hold. Idempotent: a missing or already-closed record is a
    /// successful no-op reported through the outcome.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: ReservationId) -> ReleaseOutcome {
        let now = self.clock.now();
        let released = {
            let mut records = self.records.write().await;
            match records.get_mut(&reservation_id) {
                None => return ReleaseOutcome::NotFound,
                Some(record) => match record.status {
                    ReservationStatus::Released => return ReleaseOutcome::AlreadyReleased,
                    ReservationStatus::Expired => return ReleaseOutcome::AlreadyExpired,
                    ReservationStatus::Active => {
                        record.close(ReservationStatus::Released, now);
                        record.clone()
                    }
                },
            }
        };

        metrics::counter!("reservations_released").increment(1);
        tracing::info!("reservation released");
        self.publish_release(&released, CloseReason::Released).await;

        ReleaseOutcome::Released
    }

    /// Expires every active record whose TTL has run out at `now`, then
    /// purges terminal records past their retention window.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);

        let (expired, purged, active) = {
            let mut records = self.records.write().await;

            let mut expired = Vec::new();
            for record in records.values_mut() {
                if record.is_due(now) {
                    record.close(ReservationStatus::Expired, now);
                    expired.push(record.clone());
                }
            }

            let before = records.len();
            records.retain(|_, record| match record.closed_at {
                Some(closed_at) if record.status.is_terminal() => {
                    closed_at.checked_add_signed(retention).is_none_or(|until| until > now)
                }
                _ => true,
            });
            let purged = before - records.len();
            let active = records.values().filter(|r| r.is_active()).count();

            (expired, purged, active)
        };

        for record in &expired {
            tracing::info!(reservation_id = %record.reservation_id, "reservation expired");
            self.publish_release(record, CloseReason::Expired).await;
        }

        metrics::counter!("reservations_expired").increment(expired.len() as u64);
        metrics::gauge!("reservations_active").set(active as f64);

        let report = SweepReport {
            expired: expired.len(),
            purged,
        };
        if report != SweepReport::default() {
            tracing::debug!(expired = report.expired, purged = report.purged, "sweep finished");
        }
        report
    }

    /// Sweeps at the clock's current time.
    pub async fn sweep_now(&self) -> SweepReport {
        self.sweep(self.clock.now()).await
    }

    pub async fn get(&self, reservation_id: ReservationId) -> Option<ReservationRecord> {
        self.records.read().await.get(&reservation_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.is_active())
            .count()
    }

    /// Total quantity of `product_id` held by active reservations.
    pub async fn reserved_quantity(&self, product_id: &ProductId) -> u64 {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.quantity_of(product_id))
            .sum()
    }

    async fn publish_release(&self, record: &ReservationRecord, reason: CloseReason) {
        let response = ReleaseResponse {
            success: true,
            reservation_id: record.reservation_id,
            items: &record.items,
            reason,
        };
        self.publish(
            kinds::INVENTORY_RELEASE_RESPONSE,
            &response,
            record.correlation_id.as_deref(),
        )
        .await;
    }

    async fn publish<T: Serialize>(&self, event_type: &str, data: &T, correlation_id: Option<&str>) {
        let result = match correlation_id {
            Some(correlation_id) => {
                self.bus
                    .emit_with_correlation(event_type, data, correlation_id)
                    .await
            }
            None => self.bus.emit(event_type, data).await,
        };
        // The record change has already happened; a lost notification must
        // not undo it.
        if let Err(err) = result {
            tracing::warn!(event_type, error = %err, "failed to emit reservation event");
        }
    }
}

fn validate_items(items: &[ReservationItem]) -> Result<()> {
    if items.is_empty() {
        return Err(ReservationError::EmptyItems);
    }
    if let Some(item) = items.iter().find(|item| item.quantity == 0) {
        return Err(ReservationError::InvalidQuantity {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;

    fn store_with_clock() -> (ReservationStore, Arc<ManualClock>, EventBus) {
        let bus = EventBus::new("inventory-service");
        let clock = Arc::new(ManualClock::default());
        let store =
            ReservationStore::with_clock(bus.clone(), ReservationConfig::default(), clock.clone());
        (store, clock, bus)
    }

    fn items() -> Vec<ReservationItem> {
        vec![ReservationItem::new("P1", 5)]
    }

    #[tokio::test]
    async fn test_reserve_defaults_to_fifteen_minutes() {
        let (store, clock, _) = store_with_clock();
        let record = store.reserve(items(), None).await.unwrap();

        assert_eq!(record.status, ReservationStatus::Active);
        assert_eq!(record.created_at, clock.now());
        assert_eq!(record.expires_at, clock.now() + ChronoDuration::minutes(15));
        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_reserve_rejects_empty_items() {
        let (store, _, bus) = store_with_clock();
        let err = store.reserve(vec![], None).await.unwrap_err();
        assert_eq!(err, ReservationError::EmptyItems);
        assert_eq!(bus.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_zero_quantity() {
        let (store, _, _) = store_with_clock();
        let err = store
            .reserve(
                vec![ReservationItem::new("P1", 1), ReservationItem::new("P2", 0)],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReservationError::InvalidQuantity {
                product_id: ProductId::new("P2"),
                quantity: 0
            }
        );
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_zero_ttl() {
        let (store, _, _) = store_with_clock();
        let result = store.reserve(items(), Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(ReservationError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_reserve_emits_response() {
        let (store, _, bus) = store_with_clock();
        let record = store
            .reserve_correlated(items(), None, Some("exec-1".to_string()))
            .await
            .unwrap();

        let history = bus.history(Some(kinds::INVENTORY_RESERVE_RESPONSE), None).await;
        assert_eq!(history.len(), 1);
        let event = &history[0];
        assert_eq!(event.correlation_id(), Some("exec-1"));
        assert_eq!(event.data()["success"], true);
        assert_eq!(
            event.data()["reservation_id"],
            record.reservation_id.to_string()
        );
        assert_eq!(event.data()["items"][0]["quantity"], 5);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (store, _, bus) = store_with_clock();
        let record = store.reserve(items(), None).await.unwrap();

        assert_eq!(store.release(record.reservation_id).await, ReleaseOutcome::Released);
        assert_eq!(
            store.release(record.reservation_id).await,
            ReleaseOutcome::AlreadyReleased
        );

        let stored = store.get(record.reservation_id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
        assert!(stored.closed_at.is_some());

        let releases = bus.history(Some(kinds::INVENTORY_RELEASE_RESPONSE), None).await;
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].data()["reason"], "released");
    }

    #[tokio::test]
    async fn test_release_unknown_is_not_found() {
        let (store, _, bus) = store_with_clock();
        assert_eq!(
            store.release(ReservationId::new()).await,
            ReleaseOutcome::NotFound
        );
        assert_eq!(bus.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_boundary() {
        let (store, clock, _) = store_with_clock();
        let record = store
            .reserve(items(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let just_before = record.expires_at - ChronoDuration::milliseconds(1);
        assert_eq!(store.sweep(just_before).await.expired, 0);
        assert!(store.get(record.reservation_id).await.unwrap().is_active());

        clock.advance(ChronoDuration::seconds(61));
        let report = store.sweep_now().await;
        assert_eq!(report.expired, 1);
        assert_eq!(
            store.get(record.reservation_id).await.unwrap().status,
            ReservationStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_does_not_re_expire() {
        let (store, clock, bus) = store_with_clock();
        store
            .reserve(items(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(2));

        assert_eq!(store.sweep_now().await.expired, 1);
        assert_eq!(store.sweep_now().await.expired, 0);

        let releases = bus.history(Some(kinds::INVENTORY_RELEASE_RESPONSE), None).await;
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].data()["reason"], "expired");
    }

    #[tokio::test]
    async fn test_release_after_expiry_is_noop() {
        let (store, clock, _) = store_with_clock();
        let record = store
            .reserve(items(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(5));
        store.sweep_now().await;

        assert_eq!(
            store.release(record.reservation_id).await,
            ReleaseOutcome::AlreadyExpired
        );
    }

    #[tokio::test]
    async fn test_sweep_purges_after_retention() {
        let (store, clock, _) = store_with_clock();
        let released = store.reserve(items(), None).await.unwrap();
        let kept = store.reserve(items(), Some(Duration::from_secs(3 * 3600))).await.unwrap();
        store.release(released.reservation_id).await;

        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(store.sweep_now().await.purged, 0);
        assert!(store.get(released.reservation_id).await.is_some());

        clock.advance(ChronoDuration::minutes(31));
        assert_eq!(store.sweep_now().await.purged, 1);
        assert!(store.get(released.reservation_id).await.is_none());
        assert_eq!(
            store.release(released.reservation_id).await,
            ReleaseOutcome::NotFound
        );
        // Active holds are never purged.
        assert!(store.get(kept.reservation_id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_reserved_quantity_counts_active_only() {
        let (store, _, _) = store_with_clock();
        let a = store
            .reserve(vec![ReservationItem::new("P1", 3)], None)
            .await
            .unwrap();
        store
            .reserve(
                vec![ReservationItem::new("P1", 2), ReservationItem::new("P2", 7)],
                None,
            )
            .await
            .unwrap();

        let p1 = ProductId::new("P1");
        assert_eq!(store.reserved_quantity(&p1).await, 5);
        store.release(a.reservation_id).await;
        assert_eq!(store.reserved_quantity(&p1).await, 2);
        assert_eq!(store.reserved_quantity(&ProductId::new("P2")).await, 7);
    }
}
