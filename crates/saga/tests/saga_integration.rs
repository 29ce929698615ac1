//! Integration tests for saga execution and the checkout workflow.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Money, ProductId};
use event_bus::{EventBus, kinds};
use reservations::{ReservationStatus, ReservationStore};
use saga::{
    CheckoutItem, CheckoutReceipt, CheckoutRequest, CheckoutServices, InMemoryInventoryService,
    InMemoryPaymentService, SagaDefinition, SagaManager, SagaState, Step, StepError,
    checkout_saga,
};

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A step that records its calls and fails when `fail` is set.
fn recorded(name: &'static str, log: &Log, fail: bool, compensable: bool) -> Step<u32, u32> {
    let exec_log = Arc::clone(log);
    let step = Step::new(name, move |n: u32| {
        let log = Arc::clone(&exec_log);
        async move {
            log.lock().unwrap().push(format!("execute {name}"));
            if fail {
                return Err(StepError::new(format!("{name} exploded")));
            }
            Ok(n + 1)
        }
    });
    if !compensable {
        return step;
    }
    let comp_log = Arc::clone(log);
    step.with_compensation(move |input: u32, output: u32| {
        let log = Arc::clone(&comp_log);
        async move {
            log.lock()
                .unwrap()
                .push(format!("compensate {name} {input} {output}"));
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_failed_charge_compensates_reserve_and_skips_validate() {
    let bus = EventBus::new("sales-service");
    let manager = SagaManager::new(bus.clone());
    let log = Log::default();

    let saga = SagaDefinition::<u32>::new("purchase")
        .add_step(recorded("validate", &log, false, false))
        .add_step(recorded("reserve", &log, false, true))
        .add_step(recorded("charge", &log, true, true));

    let failure = manager.run(&saga, 1).await.unwrap_err();

    assert_eq!(failure.failed_step, "charge");
    assert_eq!(failure.error.message(), "charge exploded");
    assert_eq!(failure.state, SagaState::Compensated);
    assert!(failure.compensation_errors.is_empty());
    assert_eq!(
        entries(&log),
        vec![
            "execute validate",
            "execute reserve",
            "execute charge",
            // reserve received 2 and produced 3.
            "compensate reserve 2 3",
        ]
    );

    let failed = bus.history(Some(kinds::SAGA_FAILED), None).await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data()["saga_name"], "purchase");
    assert_eq!(failed[0].data()["compensated"], true);
    assert_eq!(
        failed[0].correlation_id(),
        Some(failure.execution_id.to_string().as_str())
    );

    let execution = manager.execution(failure.execution_id).await.unwrap();
    let skipped: Vec<_> = execution
        .journal
        .iter()
        .filter(|e| e.event_type() == "CompensationStepSkipped")
        .filter_map(|e| e.step_name())
        .collect();
    assert_eq!(skipped, vec!["validate"]);
}

#[tokio::test]
async fn test_compensation_runs_in_exact_reverse_order_for_every_failure_point() {
    const STEPS: [&str; 5] = ["s1", "s2", "s3", "s4", "s5"];

    for k in 0..STEPS.len() {
        let log = Log::default();
        let mut saga = SagaDefinition::<u32>::new("reverse")
            .add_step(recorded(STEPS[0], &log, k == 0, true));
        for (i, name) in STEPS.iter().copied().enumerate().skip(1) {
            saga = saga.add_step(recorded(name, &log, i == k, true));
        }

        let manager = SagaManager::new(EventBus::new("svc"));
        let failure = manager.run(&saga, 0).await.unwrap_err();
        assert_eq!(failure.failed_step, STEPS[k]);

        let compensated: Vec<String> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("compensate"))
            .map(|e| e.split(' ').nth(1).unwrap().to_string())
            .collect();
        let expected: Vec<String> = STEPS[..k].iter().rev().map(|s| s.to_string()).collect();
        assert_eq!(compensated, expected, "failure at step {}", k + 1);
    }
}

#[tokio::test]
async fn test_success_never_compensates() {
    let bus = EventBus::new("svc");
    let log = Log::default();
    let saga = SagaDefinition::<u32>::new("ok")
        .add_step(recorded("a", &log, false, true))
        .add_step(recorded("b", &log, false, true))
        .add_step(recorded("c", &log, false, true));

    let manager = SagaManager::new(bus.clone());
    assert_eq!(manager.run(&saga, 7).await.unwrap(), 10);
    assert!(entries(&log).iter().all(|e| e.starts_with("execute")));

    let completed = bus.history(Some(kinds::SAGA_COMPLETED), None).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].data()["saga_name"], "ok");
    assert_eq!(completed[0].data()["steps"], serde_json::json!(["a", "b", "c"]));
}

#[tokio::test]
async fn test_compensation_failure_does_not_stop_unwind() {
    let bus = EventBus::new("svc");
    let log = Log::default();
    let broken = Step::new("broken", |n: u32| async move { Ok(n) })
        .with_compensation(|_: u32, _: u32| async move { Err(StepError::new("cannot undo")) });

    let saga = SagaDefinition::<u32>::new("partial")
        .add_step(recorded("first", &log, false, true))
        .add_step(broken)
        .add_step(recorded("last", &log, true, true));

    let manager = SagaManager::new(bus.clone());
    let failure = manager.run(&saga, 0).await.unwrap_err();

    // The caller still sees the step error, not the compensation error.
    assert_eq!(failure.failed_step, "last");
    assert_eq!(failure.error.message(), "last exploded");
    assert_eq!(failure.state, SagaState::CompensationFailed);
    assert!(!failure.compensated());
    assert_eq!(failure.compensation_errors.len(), 1);
    assert_eq!(failure.compensation_errors[0].step, "broken");
    assert!(entries(&log).contains(&"compensate first 0 1".to_string()));

    let failed = bus.history(Some(kinds::SAGA_FAILED), None).await;
    assert_eq!(failed[0].data()["compensated"], false);
    assert_eq!(failed[0].data()["compensation_errors"][0]["step"], "broken");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_independent() {
    let manager = SagaManager::new(EventBus::new("svc"));
    let saga = Arc::new(
        SagaDefinition::<u32>::new("double")
            .add_step(Step::new("double", |n: u32| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(n * 2)
            }))
            .add_step(Step::new("check", |n: u32| async move {
                if n == 6 {
                    Err(StepError::new("three is unlucky"))
                } else {
                    Ok(n)
                }
            })),
    );

    let mut tasks = Vec::new();
    for n in 0..10u32 {
        let manager = manager.clone();
        let saga = Arc::clone(&saga);
        tasks.push(tokio::spawn(async move { (n, manager.run(&saga, n).await) }));
    }

    for task in tasks {
        let (n, result) = task.await.unwrap();
        match result {
            Ok(out) => assert_eq!(out, n * 2),
            Err(failure) => {
                assert_eq!(n, 3);
                assert_eq!(failure.state, SagaState::Compensated);
            }
        }
    }
    assert_eq!(manager.recent_executions().await.len(), 10);
}

struct CheckoutHarness {
    bus: EventBus,
    manager: SagaManager,
    saga: SagaDefinition<CheckoutRequest, CheckoutReceipt>,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    reservations: ReservationStore,
}

impl CheckoutHarness {
    fn new() -> Self {
        let bus = EventBus::new("sales-service");
        let inventory = InMemoryInventoryService::with_stock([("SKU-001", 10), ("SKU-002", 3)]);
        let payment = InMemoryPaymentService::new();
        let reservations = ReservationStore::new(bus.clone());

        let saga = checkout_saga(CheckoutServices {
            inventory: Arc::new(inventory.clone()),
            payment: Arc::new(payment.clone()),
            reservations: reservations.clone(),
            bus: bus.clone(),
            reservation_ttl: Some(Duration::from_secs(15 * 60)),
        });

        Self {
            manager: SagaManager::new(bus.clone()),
            bus,
            saga,
            inventory,
            payment,
            reservations,
        }
    }

    fn request(&self, sale_id: &str, quantity: u32) -> CheckoutRequest {
        CheckoutRequest {
            sale_id: sale_id.to_string(),
            customer_id: "cust-42".to_string(),
            items: vec![
                CheckoutItem {
                    product_id: ProductId::new("SKU-001"),
                    quantity,
                    unit_price: Money::from_cents(1000),
                },
                CheckoutItem {
                    product_id: ProductId::new("SKU-002"),
                    quantity: 1,
                    unit_price: Money::from_cents(2500),
                },
            ],
        }
    }

    async fn event_types(&self) -> Vec<String> {
        self.bus
            .history(None, None)
            .await
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

#[tokio::test]
async fn test_checkout_happy_path() {
    let h = CheckoutHarness::new();

    let receipt = h
        .manager
        .run(&h.saga, h.request("sale-1", 2))
        .await
        .unwrap();

    assert_eq!(receipt.sale_id, "sale-1");
    assert_eq!(receipt.total, Money::from_cents(4500));
    assert_eq!(h.payment.payment_count().await, 1);
    assert!(h.payment.has_payment(&receipt.payment_id).await);

    // Stock is deducted and the hold is closed.
    assert_eq!(h.inventory.stock_of(&ProductId::new("SKU-001")).await, 8);
    assert_eq!(h.inventory.stock_of(&ProductId::new("SKU-002")).await, 2);
    assert_eq!(h.reservations.active_count().await, 0);
    assert_eq!(
        h.reservations
            .get(receipt.reservation_id)
            .await
            .unwrap()
            .status,
        ReservationStatus::Released
    );

    assert_eq!(
        h.event_types().await,
        vec![
            kinds::INVENTORY_CHECK_RESPONSE,
            kinds::INVENTORY_RESERVE_RESPONSE,
            kinds::PAYMENT_CHARGED,
            kinds::INVENTORY_RELEASE_RESPONSE,
            kinds::SALE_CREATED,
            kinds::SAGA_COMPLETED,
        ]
    );
    let sale = h.bus.history(Some(kinds::SALE_CREATED), None).await;
    assert_eq!(sale[0].data()["payment_id"], receipt.payment_id);
    assert_eq!(sale[0].correlation_id(), Some("sale-1"));
}

#[tokio::test]
async fn test_checkout_payment_failure_releases_reservation() {
    let h = CheckoutHarness::new();
    h.payment.set_fail_on_charge(true).await;

    let failure = h
        .manager
        .run(&h.saga, h.request("sale-2", 2))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_step, "charge_payment");
    assert_eq!(failure.state, SagaState::Compensated);
    assert!(failure.error.message().contains("Payment declined"));

    assert_eq!(h.reservations.active_count().await, 0);
    assert_eq!(h.payment.payment_count().await, 0);
    assert_eq!(h.inventory.stock_of(&ProductId::new("SKU-001")).await, 10);

    let releases = h
        .bus
        .history(Some(kinds::INVENTORY_RELEASE_RESPONSE), None)
        .await;
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].data()["reason"], "released");

    let failed = h.bus.history(Some(kinds::SAGA_FAILED), None).await;
    assert_eq!(failed[0].data()["saga_name"], "checkout");
    assert_eq!(failed[0].data()["compensated"], true);
}

#[tokio::test]
async fn test_checkout_refund_failure_is_reported() {
    let h = CheckoutHarness::new();
    h.payment.set_fail_on_refund(true).await;
    h.inventory.set_fail_on_commit(true).await;

    let failure = h
        .manager
        .run(&h.saga, h.request("sale-3", 1))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_step, "confirm_sale");
    assert_eq!(failure.state, SagaState::CompensationFailed);
    assert_eq!(failure.compensation_errors.len(), 1);
    assert_eq!(failure.compensation_errors[0].step, "charge_payment");

    // The reservation was still released even though the refund failed.
    assert_eq!(h.reservations.active_count().await, 0);
    assert_eq!(h.payment.payment_count().await, 1);
}

#[tokio::test]
async fn test_checkout_insufficient_stock_fails_before_reserving() {
    let h = CheckoutHarness::new();

    let failure = h
        .manager
        .run(&h.saga, h.request("sale-4", 11))
        .await
        .unwrap_err();

    assert_eq!(failure.failed_step, "reserve_inventory");
    assert!(failure.error.message().contains("Insufficient stock"));
    assert_eq!(h.reservations.active_count().await, 0);
    assert_eq!(h.payment.payment_count().await, 0);

    let check = h
        .bus
        .history(Some(kinds::INVENTORY_CHECK_RESPONSE), None)
        .await;
    assert_eq!(check[0].data()["success"], false);
}

#[tokio::test]
async fn test_checkout_counts_active_holds_against_stock() {
    let h = CheckoutHarness::new();
    // Another checkout already holds 8 units of SKU-001.
    h.reservations
        .reserve(
            vec![reservations::ReservationItem::new("SKU-001", 8)],
            None,
        )
        .await
        .unwrap();

    let failure = h
        .manager
        .run(&h.saga, h.request("sale-5", 3))
        .await
        .unwrap_err();
    assert_eq!(failure.failed_step, "reserve_inventory");

    h.manager
        .run(&h.saga, h.request("sale-6", 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_checkout_rejects_empty_request() {
    let h = CheckoutHarness::new();
    let mut request = h.request("sale-7", 1);
    request.items.clear();

    let failure = h.manager.run(&h.saga, request).await.unwrap_err();
    assert_eq!(failure.failed_step, "validate");
    assert_eq!(failure.state, SagaState::Compensated);
    assert!(h.bus.history(Some(kinds::INVENTORY_CHECK_RESPONSE), None).await.is_empty());
}

#[tokio::test]
async fn test_checkout_combines_repeated_lines_for_stock() {
    let h = CheckoutHarness::new();
    h.inventory.set_stock("SKU-001", 5).await;
    let line = CheckoutItem {
        product_id: ProductId::new("SKU-001"),
        quantity: 3,
        unit_price: Money::from_cents(1000),
    };
    let request = CheckoutRequest {
        sale_id: "sale-8".to_string(),
        customer_id: "cust-42".to_string(),
        items: vec![line.clone(), line],
    };

    let failure = h.manager.run(&h.saga, request).await.unwrap_err();
    assert_eq!(failure.failed_step, "reserve_inventory");
    assert!(failure.error.message().contains("Insufficient stock"));
    assert_eq!(h.inventory.stock_of(&ProductId::new("SKU-001")).await, 5);
    assert_eq!(h.reservations.active_count().await, 0);
    assert_eq!(h.payment.payment_count().await, 0);

    let check = h
        .bus
        .history(Some(kinds::INVENTORY_CHECK_RESPONSE), None)
        .await;
    assert_eq!(check[0].data()["items"][0]["requested"], 6);
}

#[tokio::test]
async fn test_checkout_rejects_negative_unit_price() {
    let h = CheckoutHarness::new();
    let request = CheckoutRequest {
        sale_id: "sale-9".to_string(),
        customer_id: "cust-42".to_string(),
        items: vec![
            CheckoutItem {
                product_id: ProductId::new("SKU-001"),
                quantity: 5,
                unit_price: Money::from_cents(-1000),
            },
            CheckoutItem {
                product_id: ProductId::new("SKU-002"),
                quantity: 1,
                unit_price: Money::from_cents(5001),
            },
        ],
    };

    let failure = h.manager.run(&h.saga, request).await.unwrap_err();
    assert_eq!(failure.failed_step, "validate");
    assert!(failure.error.message().contains("unit price"));
    assert_eq!(h.payment.payment_count().await, 0);
    assert_eq!(h.inventory.stock_of(&ProductId::new("SKU-001")).await, 10);
}
