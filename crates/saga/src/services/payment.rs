//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer.
    async fn charge(&self, customer_id: &str, amount: Money) -> Result<PaymentResult, SagaError>;

    /// Refunds a previously made payment.
    async fn refund(&self, payment_id: &str) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (String, Money)>,
    refunded: Vec<String>,
    next_id: u32,
    charge_delay: Option<Duration>,
    fail_on_charge: bool,
    fail_on_refund: bool,
}

/// In-memory payment service for tests and the demo host.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every charge fail until reset.
    pub async fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().await.fail_on_charge = fail;
    }

    /// Makes every charge take `delay` before it is decided, like a slow
    /// payment gateway.
    pub async fn set_charge_delay(&self, delay: Option<Duration>) {
        self.state.write().await.charge_delay = delay;
    }

    /// Makes every refund fail until reset.
    pub async fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().await.fail_on_refund = fail;
    }

    /// Number of payments charged and not refunded.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn has_payment(&self, payment_id: &str) -> bool {
        self.state.read().await.payments.contains_key(payment_id)
    }

    pub async fn refunded(&self) -> Vec<String> {
        self.state.read().await.refunded.clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(&self, customer_id: &str, amount: Money) -> Result<PaymentResult, SagaError> {
        let delay = self.state.read().await.charge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;

        if state.fail_on_charge {
            return Err(SagaError::PaymentService("Payment declined".to_string()));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(payment_id.clone(), (customer_id.to_string(), amount));

        Ok(PaymentResult { payment_id })
    }

    async fn refund(&self, payment_id: &str) -> Result<(), SagaError> {
        let mut state = self.state.write().await;

        if state.fail_on_refund {
            return Err(SagaError::PaymentService("Refund rejected".to_string()));
        }

        // Refunding an unknown or already refunded payment is a no-op.
        if state.payments.remove(payment_id).is_some() {
            state.refunded.push(payment_id.to_string());
        }
        Ok(())
    }
}
