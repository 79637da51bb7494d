//! Timeout sweeper behaviour over a seeded in-memory store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, EmployeeId, Money, OrderId, OrderStatus, PayStatus, RequestContext, UserId};
use domain::{AUTO_COMPLETE_REASON, AUTO_TIMEOUT_REASON, OrderLifecycle};
use order_store::{
    AddressSnapshot, InMemoryOrderStore, Order, OrderQuery, OrderStore, OrderStoreError,
    OrderTransaction, Page, PaymentIntent, TransitionEvent,
};
use payment::InMemoryPaymentGateway;
use reconciliation::{SweepReport, SweeperConfig, TimeoutSweeper};
use tokio::sync::watch;

/// Delegates to the in-memory store but refuses transactions on chosen orders.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: InMemoryOrderStore,
    broken: Arc<Mutex<HashSet<OrderId>>>,
}

impl FlakyStore {
    fn break_order(&self, id: OrderId) {
        self.broken.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn insert(&self, order: Order, actor: Actor) -> order_store::Result<Order> {
        self.inner.insert(order, actor).await
    }

    async fn get_by_id(&self, id: OrderId) -> order_store::Result<Option<Order>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_number(&self, number: &str) -> order_store::Result<Option<Order>> {
        self.inner.get_by_number(number).await
    }

    async fn begin(&self, id: OrderId) -> order_store::Result<Box<dyn OrderTransaction>> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(OrderStoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.begin(id).await
    }

    async fn conditional_update_pay_status(
        &self,
        id: OrderId,
        expected: PayStatus,
        new: PayStatus,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> order_store::Result<bool> {
        self.inner
            .conditional_update_pay_status(id, expected, new, actor, at)
            .await
    }

    async fn save_payment_intent(
        &self,
        intent: PaymentIntent,
    ) -> order_store::Result<Option<PaymentIntent>> {
        self.inner.save_payment_intent(intent).await
    }

    async fn get_payment_intent(&self, id: OrderId) -> order_store::Result<Option<PaymentIntent>> {
        self.inner.get_payment_intent(id).await
    }

    async fn transitions(&self, id: OrderId) -> order_store::Result<Vec<TransitionEvent>> {
        self.inner.transitions(id).await
    }

    async fn find_by_status_created_before(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> order_store::Result<Vec<Order>> {
        self.inner.find_by_status_created_before(status, cutoff).await
    }

    async fn query(&self, query: OrderQuery) -> order_store::Result<Page<Order>> {
        self.inner.query(query).await
    }

    async fn count_by_status(&self, status: OrderStatus) -> order_store::Result<u64> {
        self.inner.count_by_status(status).await
    }
}

struct Harness {
    store: FlakyStore,
    lifecycle: Arc<OrderLifecycle<FlakyStore>>,
    sweeper: TimeoutSweeper<FlakyStore>,
}

fn harness() -> Harness {
    let store = FlakyStore::default();
    let lifecycle = Arc::new(OrderLifecycle::new(
        store.clone(),
        Arc::new(InMemoryPaymentGateway::new()),
    ));
    Harness {
        sweeper: TimeoutSweeper::new(lifecycle.clone(), SweeperConfig::default()),
        store,
        lifecycle,
    }
}

fn admin() -> RequestContext {
    RequestContext::new(Actor::Admin(EmployeeId::new(9)))
}

/// Inserts an unpaid order created `age` ago.
async fn seed(h: &Harness, number: &str, age: chrono::Duration) -> Order {
    let order = Order::new(
        number,
        UserId::new(1),
        Money::from_cents(2500),
        AddressSnapshot {
            consignee: "Zhang".to_string(),
            phone: "13700000000".to_string(),
            detail: "3 Lake Rd".to_string(),
        },
        None,
        Utc::now() - age,
    );
    h.store.insert(order, Actor::User(UserId::new(1))).await.unwrap()
}

async fn seed_delivering(h: &Harness, number: &str, age: chrono::Duration) -> Order {
    let order = seed(h, number, age).await;
    h.lifecycle
        .payment_confirmed(&RequestContext::gateway(), number, "TX-1")
        .await
        .unwrap();
    h.lifecycle.confirm(&admin(), order.id).await.unwrap();
    h.lifecycle.dispatch(&admin(), order.id).await.unwrap()
}

async fn status_of(h: &Harness, id: OrderId) -> Order {
    h.store.get_by_id(id).await.unwrap().unwrap()
}

mod payment_timeout {
    use super::*;

    #[tokio::test]
    async fn cancels_only_orders_past_the_window() {
        let h = harness();
        let stale = seed(&h, "OLD", chrono::Duration::minutes(16)).await;
        let fresh = seed(&h, "NEW", chrono::Duration::minutes(10)).await;

        let report = h.sweeper.sweep_payment_timeouts(Utc::now()).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                transitioned: 1,
                skipped: 0,
                failed: 0
            }
        );

        let stale = status_of(&h, stale.id).await;
        assert_eq!(stale.status, OrderStatus::Cancelled);
        assert_eq!(stale.cancel_reason.as_deref(), Some(AUTO_TIMEOUT_REASON));
        assert!(stale.cancel_time.is_some());
        assert_eq!(status_of(&h, fresh.id).await.status, OrderStatus::AwaitingPayment);

        let log = h.store.transitions(stale.id).await.unwrap();
        let last = log.last().unwrap();
        assert_eq!(last.actor, Actor::Sweeper);
        assert_eq!(last.reason.as_deref(), Some(AUTO_TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn second_pass_finds_nothing() {
        let h = harness();
        seed(&h, "OLD", chrono::Duration::minutes(16)).await;

        h.sweeper.sweep_payment_timeouts(Utc::now()).await.unwrap();
        let again = h.sweeper.sweep_payment_timeouts(Utc::now()).await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn one_failing_order_does_not_stop_the_pass() {
        let h = harness();
        let broken = seed(&h, "A", chrono::Duration::minutes(30)).await;
        let healthy = seed(&h, "B", chrono::Duration::minutes(20)).await;
        h.store.break_order(broken.id);

        let report = h.sweeper.sweep_payment_timeouts(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.transitioned, 1);
        assert_eq!(report.failed, 1);

        assert_eq!(status_of(&h, broken.id).await.status, OrderStatus::AwaitingPayment);
        assert_eq!(status_of(&h, healthy.id).await.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn paid_order_is_left_alone() {
        let h = harness();
        let order = seed(&h, "OLD", chrono::Duration::minutes(16)).await;
        h.lifecycle
            .payment_confirmed(&RequestContext::gateway(), "OLD", "TX-1")
            .await
            .unwrap();

        let report = h.sweeper.sweep_payment_timeouts(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(status_of(&h, order.id).await.status, OrderStatus::ToBeConfirmed);
    }

    #[tokio::test]
    async fn order_that_moved_after_the_scan_is_skipped() {
        let h = harness();
        let order = seed(&h, "OLD", chrono::Duration::minutes(16)).await;

        // The scan saw AWAITING_PAYMENT; payment lands before the update.
        h.lifecycle
            .payment_confirmed(&RequestContext::gateway(), "OLD", "TX-1")
            .await
            .unwrap();
        let err = h
            .lifecycle
            .expire_unpaid(&RequestContext::sweeper(), &order)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition());

        let current = status_of(&h, order.id).await;
        assert_eq!(current.status, OrderStatus::ToBeConfirmed);
        assert_eq!(current.pay_status, PayStatus::Paid);
    }
}

mod delivery {
    use super::*;

    #[tokio::test]
    async fn completes_stuck_deliveries() {
        let h = harness();
        let stuck = seed_delivering(&h, "OLD", chrono::Duration::minutes(61)).await;
        let recent = seed_delivering(&h, "NEW", chrono::Duration::minutes(30)).await;

        let report = h.sweeper.sweep_stuck_deliveries(Utc::now()).await.unwrap();
        assert_eq!(report.transitioned, 1);

        let stuck = status_of(&h, stuck.id).await;
        assert_eq!(stuck.status, OrderStatus::Completed);
        assert!(stuck.delivery_time.is_some());
        let log = h.store.transitions(stuck.id).await.unwrap();
        assert_eq!(log.last().unwrap().reason.as_deref(), Some(AUTO_COMPLETE_REASON));

        assert_eq!(status_of(&h, recent.id).await.status, OrderStatus::Delivering);
    }

    #[tokio::test]
    async fn ignores_orders_in_other_states() {
        let h = harness();
        seed(&h, "UNPAID", chrono::Duration::hours(3)).await;

        let report = h.sweeper.sweep_stuck_deliveries(Utc::now()).await.unwrap();
        assert_eq!(report.scanned, 0);
    }
}

mod run_loop {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn runs_on_interval_and_stops_on_shutdown() {
        let h = harness();
        let order = seed(&h, "OLD", chrono::Duration::minutes(16)).await;

        let config = SweeperConfig {
            payment_interval: Duration::from_secs(60),
            ..SweeperConfig::default()
        };
        let sweeper = Arc::new(TimeoutSweeper::new(h.lifecycle.clone(), config));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(status_of(&h, order.id).await.status, OrderStatus::Cancelled);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
