use std::sync::Arc;

use common::{Actor, EmployeeId, RequestContext, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{OrderLifecycle, SubmitOrder};
use order_store::{AddressSnapshot, InMemoryOrderStore};
use payment::InMemoryPaymentGateway;
use rust_decimal_macros::dec;

fn service() -> OrderLifecycle<InMemoryOrderStore> {
    OrderLifecycle::new(
        InMemoryOrderStore::new(),
        Arc::new(InMemoryPaymentGateway::new()),
    )
}

fn address() -> AddressSnapshot {
    AddressSnapshot {
        consignee: "Bench".to_string(),
        phone: "13000000000".to_string(),
        detail: "1 Bench St".to_string(),
    }
}

fn bench_submit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = service();
    let user = RequestContext::new(Actor::User(UserId::new(1)));

    c.bench_function("lifecycle/submit", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .submit(&user, SubmitOrder::new(dec!(25.00), address()))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = service();
    let user = RequestContext::new(Actor::User(UserId::new(1)));
    let admin = RequestContext::new(Actor::Admin(EmployeeId::new(1)));
    let gateway = RequestContext::gateway();

    c.bench_function("lifecycle/submit_to_complete", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = service
                    .submit(&user, SubmitOrder::new(dec!(25.00), address()))
                    .await
                    .unwrap();
                service
                    .payment_confirmed(&gateway, &order.number, "TX")
                    .await
                    .unwrap();
                service.confirm(&admin, order.id).await.unwrap();
                service.dispatch(&admin, order.id).await.unwrap();
                service.complete(&admin, order.id).await.unwrap();
            });
        });
    });
}

fn bench_rejected_transition(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = service();
    let user = RequestContext::new(Actor::User(UserId::new(1)));
    let admin = RequestContext::new(Actor::Admin(EmployeeId::new(1)));
    let order = rt.block_on(async {
        service
            .submit(&user, SubmitOrder::new(dec!(25.00), address()))
            .await
            .unwrap()
    });

    c.bench_function("lifecycle/invalid_transition", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = service.dispatch(&admin, order.id).await;
                assert!(result.is_err());
            });
        });
    });
}

criterion_group!(
    benches,
    bench_submit,
    bench_full_lifecycle,
    bench_rejected_transition,
);
criterion_main!(benches);
