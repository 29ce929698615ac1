//! Checkout saga: reserve inventory, charge payment, confirm the sale.

use std::sync::Arc;
use std::time::Duration;

use common::{Money, ProductId, ReservationId};
use event_bus::{EventBus, kinds};
use reservations::{ReservationItem, ReservationStore};
use serde::{Deserialize, Serialize};

use crate::definition::SagaDefinition;
use crate::error::{SagaError, StepError};
use crate::services::{InventoryService, PaymentService};
use crate::step::Step;

/// The saga name reported in `saga.completed` / `saga.failed`.
pub const SAGA_NAME: &str = "checkout";

pub const STEP_VALIDATE: &str = "validate";
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";
pub const STEP_CONFIRM_SALE: &str = "confirm_sale";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub sale_id: String,
    pub customer_id: String,
    pub items: Vec<CheckoutItem>,
}

impl CheckoutRequest {
    /// Sum of every line. Overflow is a validation error.
    pub fn total(&self) -> Result<Money, SagaError> {
        self.items.iter().try_fold(Money::zero(), |acc, item| {
            item.unit_price
                .checked_multiply(item.quantity)
                .and_then(|line| acc.checked_add(line))
                .ok_or_else(|| SagaError::Validation("order total overflows".to_string()))
        })
    }

    /// Quantity per product with repeated lines combined, in first-seen order.
    pub fn reservation_items(&self) -> Result<Vec<ReservationItem>, SagaError> {
        let mut merged: Vec<ReservationItem> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match merged.iter_mut().find(|m| m.product_id == item.product_id) {
                Some(existing) => {
                    existing.quantity =
                        existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                            SagaError::Validation(format!(
                                "quantity for {} overflows",
                                item.product_id
                            ))
                        })?;
                }
                None => merged.push(ReservationItem::new(item.product_id.clone(), item.quantity)),
            }
        }
        Ok(merged)
    }
}

/// Output of `reserve_inventory`.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub request: CheckoutRequest,
    pub reservation_id: ReservationId,
}

/// Output of `charge_payment`.
#[derive(Debug, Clone)]
pub struct Charged {
    pub reserved: Reserved,
    pub payment_id: String,
}

/// Result of a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReceipt {
    pub sale_id: String,
    pub customer_id: String,
    pub reservation_id: ReservationId,
    pub payment_id: String,
    pub total: Money,
}

/// Everything the checkout steps talk to.
#[derive(Clone)]
pub struct CheckoutServices {
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub reservations: ReservationStore,
    pub bus: EventBus,
    /// TTL for the inventory hold; the store default when `None`.
    pub reservation_ttl: Option<Duration>,
}

#[derive(Serialize)]
struct StockCheck<'a> {
    product_id: &'a ProductId,
    requested: u64,
    available: u64,
}

/// Builds the checkout saga.
///
/// | step                | compensation               |
/// |---------------------|----------------------------|
/// | `validate`          | none                       |
/// | `reserve_inventory` | release the reservation    |
/// | `charge_payment`    | refund the payment         |
/// | `confirm_sale`      | none (last step)           |
pub fn checkout_saga(services: CheckoutServices) -> SagaDefinition<CheckoutRequest, CheckoutReceipt> {
    SagaDefinition::new(SAGA_NAME)
        .add_step(validate_step())
        .add_step(reserve_step(services.clone()))
        .add_step(charge_step(services.clone()))
        .add_step(confirm_step(services))
}

fn validate_step() -> Step<CheckoutRequest, CheckoutRequest> {
    Step::new(STEP_VALIDATE, |request: CheckoutRequest| async move {
        if request.items.is_empty() {
            return Err(SagaError::Validation("no items".to_string()).into());
        }
        for item in &request.items {
            if item.quantity == 0 {
                return Err(SagaError::Validation(format!(
                    "quantity for {} must be positive",
                    item.product_id
                ))
                .into());
            }
            if !item.unit_price.is_positive() {
                return Err(SagaError::Validation(format!(
                    "unit price for {} must be positive",
                    item.product_id
                ))
                .into());
            }
        }
        request.total()?;
        request.reservation_items()?;
        Ok::<_, StepError>(request)
    })
}

fn reserve_step(services: CheckoutServices) -> Step<CheckoutRequest, Reserved> {
    let release_store = services.reservations.clone();

    Step::new(STEP_RESERVE_INVENTORY, move |request: CheckoutRequest| {
        let services = services.clone();
        async move {
            let items = request.reservation_items()?;
            check_stock(&services, &request.sale_id, &items).await?;

            let record = services
                .reservations
                .reserve_correlated(
                    items,
                    services.reservation_ttl,
                    Some(request.sale_id.clone()),
                )
                .await?;

            Ok::<_, StepError>(Reserved {
                request,
                reservation_id: record.reservation_id,
            })
        }
    })
    .with_compensation(move |_request: CheckoutRequest, reserved: Reserved| {
        let store = release_store.clone();
        async move {
            let outcome = store.release(reserved.reservation_id).await;
            tracing::info!(reservation_id = %reserved.reservation_id, ?outcome, "reservation released by compensation");
            Ok::<(), StepError>(())
        }
    })
}

/// Checks that unreserved stock covers every product and reports the result
/// as `inventory.check.response`.
async fn check_stock(
    services: &CheckoutServices,
    sale_id: &str,
    items: &[ReservationItem],
) -> Result<(), StepError> {
    let mut checks = Vec::with_capacity(items.len());
    let mut shortage = None;

    for item in items {
        let on_hand = services.inventory.stock_level(&item.product_id).await?;
        let held = services
            .reservations
            .reserved_quantity(&item.product_id)
            .await;
        let available = on_hand.saturating_sub(held);
        let requested = u64::from(item.quantity);
        if requested > available && shortage.is_none() {
            shortage = Some(SagaError::InsufficientStock {
                product_id: item.product_id.clone(),
                requested,
                available,
            });
        }
        checks.push(StockCheck {
            product_id: &item.product_id,
            requested,
            available,
        });
    }

    let payload = serde_json::json!({
        "success": shortage.is_none(),
        "sale_id": sale_id,
        "items": checks,
    });
    if let Err(err) = services
        .bus
        .emit_with_correlation(kinds::INVENTORY_CHECK_RESPONSE, &payload, sale_id)
        .await
    {
        tracing::warn!(error = %err, "failed to emit stock check response");
    }

    match shortage {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn charge_step(services: CheckoutServices) -> Step<Reserved, Charged> {
    let refund = services.clone();

    Step::new(STEP_CHARGE_PAYMENT, move |reserved: Reserved| {
        let services = services.clone();
        async move {
            let request = &reserved.request;
            let amount = request.total()?;
            let payment = services
                .payment
                .charge(&request.customer_id, amount)
                .await?;

            emit(
                &services.bus,
                kinds::PAYMENT_CHARGED,
                &serde_json::json!({
                    "sale_id": request.sale_id,
                    "payment_id": payment.payment_id,
                    "amount": amount,
                }),
                &request.sale_id,
            )
            .await;

            Ok::<_, StepError>(Charged {
                reserved,
                payment_id: payment.payment_id,
            })
        }
    })
    .with_compensation(move |reserved: Reserved, charged: Charged| {
        let services = refund.clone();
        async move {
            services.payment.refund(&charged.payment_id).await?;
            emit(
                &services.bus,
                kinds::PAYMENT_REFUNDED,
                &serde_json::json!({
                    "sale_id": reserved.request.sale_id,
                    "payment_id": charged.payment_id,
                }),
                &reserved.request.sale_id,
            )
            .await;
            Ok::<(), StepError>(())
        }
    })
}

fn confirm_step(services: CheckoutServices) -> Step<Charged, CheckoutReceipt> {
    Step::new(STEP_CONFIRM_SALE, move |charged: Charged| {
        let services = services.clone();
        async move {
            let Charged {
                reserved,
                payment_id,
            } = charged;
            let request = reserved.request;

            // The hold turns into a stock deduction.
            services
                .inventory
                .commit(&request.reservation_items()?)
                .await?;
            services.reservations.release(reserved.reservation_id).await;

            let receipt = CheckoutReceipt {
                total: request.total()?,
                sale_id: request.sale_id,
                customer_id: request.customer_id,
                reservation_id: reserved.reservation_id,
                payment_id,
            };
            emit(&services.bus, kinds::SALE_CREATED, &receipt, &receipt.sale_id).await;
            Ok::<_, StepError>(receipt)
        }
    })
}

async fn emit<T: Serialize>(bus: &EventBus, event_type: &str, data: &T, correlation_id: &str) {
    if let Err(err) = bus.emit_with_correlation(event_type, data, correlation_id).await {
        tracing::warn!(event_type, error = %err, "failed to emit checkout event");
    }
}
