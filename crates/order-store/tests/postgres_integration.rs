//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Actor, EmployeeId, Money, OrderStatus, PayStatus, UserId};
use order_store::{
    AddressSnapshot, Order, OrderChanges, OrderQuery, OrderStore, OrderStoreError, OrderStoreExt,
    PaymentIntent, PostgresOrderStore, StatusUpdate, UpdateOutcome,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_orders.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE payment_intents, order_transitions, orders")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn new_order(number: &str, created_at: chrono::DateTime<Utc>) -> Order {
    Order::new(
        number,
        UserId::new(7),
        Money::from_cents(4250),
        AddressSnapshot {
            consignee: "Wang".to_string(),
            phone: "13900000000".to_string(),
            detail: "8 River Rd".to_string(),
        },
        Some("no chilli".to_string()),
        created_at,
    )
}

fn update(order: &Order, expected: OrderStatus, new: OrderStatus) -> StatusUpdate {
    StatusUpdate {
        order_id: order.id,
        expected,
        new,
        actor: Actor::Admin(EmployeeId::new(3)),
        at: Utc::now(),
        trigger: "test".to_string(),
        reason: None,
        changes: OrderChanges::default(),
    }
}

#[tokio::test]
async fn insert_and_read_back() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-1", Utc::now()), Actor::User(UserId::new(7)))
        .await
        .unwrap();

    let loaded = store.get_by_number("PG-1").await.unwrap().unwrap();
    assert_eq!(loaded.id, order.id);
    assert_eq!(loaded.amount, Money::from_cents(4250));
    assert_eq!(loaded.status, OrderStatus::AwaitingPayment);
    assert_eq!(loaded.pay_status, PayStatus::Unpaid);
    assert_eq!(loaded.remark.as_deref(), Some("no chilli"));
    assert_eq!(loaded.audit.created_by, Some(7));

    let log = store.transitions(order.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].from, None);
    assert_eq!(log[0].actor, Actor::User(UserId::new(7)));
}

#[tokio::test]
async fn duplicate_number_maps_to_domain_error() {
    let store = get_test_store().await;
    store
        .insert(new_order("PG-DUP", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let result = store
        .insert(new_order("PG-DUP", Utc::now()), Actor::Sweeper)
        .await;
    assert!(matches!(
        result,
        Err(OrderStoreError::DuplicateOrderNumber(n)) if n == "PG-DUP"
    ));
}

#[tokio::test]
async fn conditional_update_writes_status_fields_and_log() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-2", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let mut paid = update(&order, OrderStatus::AwaitingPayment, OrderStatus::ToBeConfirmed);
    paid.actor = Actor::Gateway;
    paid.changes = OrderChanges {
        pay_status: Some(PayStatus::Paid),
        transaction_id: Some("TX-42".to_string()),
        checkout_time: Some(paid.at),
        ..Default::default()
    };

    let outcome = store.conditional_update_status(paid).await.unwrap();
    assert!(outcome.is_applied());

    let loaded = store.load(order.id).await.unwrap();
    assert_eq!(loaded.status, OrderStatus::ToBeConfirmed);
    assert_eq!(loaded.pay_status, PayStatus::Paid);
    assert_eq!(loaded.transaction_id.as_deref(), Some("TX-42"));
    assert!(loaded.checkout_time.is_some());

    let log = store.transitions(order.id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].from, Some(OrderStatus::AwaitingPayment));
    assert_eq!(log[1].actor, Actor::Gateway);
    assert!(log[0].seq > 0);
    assert!(log[0].seq < log[1].seq);
}

#[tokio::test]
async fn stale_expectation_is_rejected() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-3", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    store
        .conditional_update_status(update(
            &order,
            OrderStatus::AwaitingPayment,
            OrderStatus::Cancelled,
        ))
        .await
        .unwrap();

    let outcome = store
        .conditional_update_status(update(
            &order,
            OrderStatus::AwaitingPayment,
            OrderStatus::ToBeConfirmed,
        ))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Rejected {
            current: OrderStatus::Cancelled
        }
    );
    assert_eq!(store.transitions(order.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_updates_commit_exactly_once() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-RACE", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for target in [OrderStatus::Cancelled, OrderStatus::ToBeConfirmed] {
        let store = store.clone();
        let u = update(&order, OrderStatus::AwaitingPayment, target);
        handles.push(tokio::spawn(async move {
            store.conditional_update_status(u).await.unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(store.transitions(order.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn rollback_leaves_order_untouched() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-RB", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let mut tx = store.begin(order.id).await.unwrap();
    tx.conditional_update_status(update(
        &order,
        OrderStatus::AwaitingPayment,
        OrderStatus::Cancelled,
    ))
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    let loaded = store.load(order.id).await.unwrap();
    assert_eq!(loaded.status, OrderStatus::AwaitingPayment);
    assert_eq!(store.transitions(order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn payment_intent_lives_only_while_awaiting_payment() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-INT", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let intent = PaymentIntent {
        order_id: order.id,
        prepay_id: "wx-prepay".to_string(),
        created_at: Utc::now(),
    };
    let live = store.save_payment_intent(intent.clone()).await.unwrap();
    assert_eq!(live.unwrap().prepay_id, "wx-prepay");

    let later = PaymentIntent {
        prepay_id: "wx-later".to_string(),
        ..intent.clone()
    };
    let live = store.save_payment_intent(later).await.unwrap();
    assert_eq!(live.unwrap().prepay_id, "wx-prepay");
    assert_eq!(
        store.get_payment_intent(order.id).await.unwrap().unwrap().prepay_id,
        "wx-prepay"
    );

    store
        .conditional_update_status(update(
            &order,
            OrderStatus::AwaitingPayment,
            OrderStatus::Cancelled,
        ))
        .await
        .unwrap();

    assert!(store.get_payment_intent(order.id).await.unwrap().is_none());
    assert!(store.save_payment_intent(intent).await.unwrap().is_none());
}

#[tokio::test]
async fn pay_status_cas() {
    let store = get_test_store().await;
    let order = store
        .insert(new_order("PG-PAY", Utc::now()), Actor::Sweeper)
        .await
        .unwrap();

    let first = store
        .conditional_update_pay_status(
            order.id,
            PayStatus::Unpaid,
            PayStatus::Refunded,
            Actor::Gateway,
            Utc::now(),
        )
        .await
        .unwrap();
    let second = store
        .conditional_update_pay_status(
            order.id,
            PayStatus::Unpaid,
            PayStatus::Refunded,
            Actor::Gateway,
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn stale_scan_and_search() {
    let store = get_test_store().await;
    let now = Utc::now();
    store
        .insert(new_order("PG-OLD", now - Duration::minutes(16)), Actor::Sweeper)
        .await
        .unwrap();
    store
        .insert(new_order("PG-NEW", now - Duration::minutes(10)), Actor::Sweeper)
        .await
        .unwrap();

    let stale = store
        .find_by_status_created_before(OrderStatus::AwaitingPayment, now - Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].number, "PG-OLD");

    let page = store
        .query(OrderQuery::for_user(UserId::new(7)).page(1, 1))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.records[0].number, "PG-NEW");

    let by_number = store.query(OrderQuery::new().number("PG-OLD")).await.unwrap();
    assert_eq!(by_number.total, 1);

    let far = store
        .query(OrderQuery::new().page(usize::MAX, usize::MAX))
        .await
        .unwrap();
    assert_eq!(far.total, 2);
    assert!(far.records.is_empty());

    assert_eq!(
        store
            .count_by_status(OrderStatus::AwaitingPayment)
            .await
            .unwrap(),
        2
    );
}
