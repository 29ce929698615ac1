//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use reservations::ReservationItem;
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Stock levels owned by the inventory service.
///
/// Holds are tracked separately by the reservation store; this trait only
/// knows physical stock.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Units of `product_id` on hand.
    async fn stock_level(&self, product_id: &ProductId) -> Result<u64, SagaError>;

    /// Deducts sold quantities from stock.
    async fn commit(&self, items: &[ReservationItem]) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<ProductId, u64>,
    fail_on_check: bool,
    fail_on_commit: bool,
}

/// In-memory inventory service for tests and the demo host.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service stocked with `levels`.
    pub fn with_stock<I, P>(levels: I) -> Self
    where
        I: IntoIterator<Item = (P, u64)>,
        P: Into<ProductId>,
    {
        let stock = levels.into_iter().map(|(p, n)| (p.into(), n)).collect();
        Self {
            state: Arc::new(RwLock::new(InMemoryInventoryState {
                stock,
                ..Default::default()
            })),
        }
    }

    pub async fn set_stock(&self, product_id: impl Into<ProductId>, quantity: u64) {
        self.state
            .write()
            .await
            .stock
            .insert(product_id.into(), quantity);
    }

    /// Makes stock checks fail as if the service were down.
    pub async fn set_fail_on_check(&self, fail: bool) {
        self.state.write().await.fail_on_check = fail;
    }

    /// Makes stock deductions fail.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    pub async fn stock_of(&self, product_id: &ProductId) -> u64 {
        self.state
            .read()
            .await
            .stock
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn stock_level(&self, product_id: &ProductId) -> Result<u64, SagaError> {
        let state = self.state.read().await;
        if state.fail_on_check {
            return Err(SagaError::InventoryService(
                "inventory service unavailable".to_string(),
            ));
        }
        Ok(state.stock.get(product_id).copied().unwrap_or(0))
    }

    async fn commit(&self, items: &[ReservationItem]) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        if state.fail_on_commit {
            return Err(SagaError::InventoryService(
                "stock deduction rejected".to_string(),
            ));
        }

        let mut requested: HashMap<&ProductId, u64> = HashMap::new();
        for item in items {
            let total = requested.entry(&item.product_id).or_default();
            *total = total.saturating_add(u64::from(item.quantity));
        }

        let mut remaining = Vec::with_capacity(requested.len());
        for (product_id, quantity) in requested {
            let on_hand = state.stock.get(product_id).copied().unwrap_or(0);
            let left = on_hand
                .checked_sub(quantity)
                .ok_or_else(|| SagaError::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available: on_hand,
                })?;
            remaining.push((product_id.clone(), left));
        }
        state.stock.extend(remaining);
        Ok(())
    }
}
