use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, OrderId, OrderStatus, PayStatus};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Auditable, Order, OrderQuery, OrderStoreError, Page, PaymentIntent, Result, StatusUpdate,
    TransitionEvent, UpdateOutcome,
    store::{OrderStore, OrderTransaction, validate_edge},
};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    numbers: HashMap<String, OrderId>,
    transitions: Vec<TransitionEvent>,
    intents: HashMap<OrderId, PaymentIntent>,
}

/// In-memory order store.
///
/// Has no native conditional update, so every read-check-write on an order
/// runs under that order's exclusive lock.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<DashMap<OrderId, Arc<Mutex<()>>>>,
    seq: Arc<AtomicI64>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of transition entries stored.
    pub async fn transition_count(&self) -> usize {
        self.tables.read().await.transitions.len()
    }

    fn next_seq(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn lock_order(&self, id: OrderId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, mut order: Order, actor: Actor) -> Result<Order> {
        order.apply_audit(order.created_at, actor, true);

        let mut tables = self.tables.write().await;
        if tables.numbers.contains_key(&order.number) {
            return Err(OrderStoreError::DuplicateOrderNumber(order.number));
        }

        let mut created = TransitionEvent::created(&order, actor);
        created.seq = Self::next_seq(&self.seq);
        tables.numbers.insert(order.number.clone(), order.id);
        tables.transitions.push(created);
        tables.orders.insert(order.id, order.clone());

        Ok(order)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .numbers
            .get(number)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    async fn begin(&self, id: OrderId) -> Result<Box<dyn OrderTransaction>> {
        let guard = self.lock_order(id).await;
        Ok(Box::new(InMemoryTransaction {
            order_id: id,
            tables: self.tables.clone(),
            seq: self.seq.clone(),
            staged: None,
            _guard: guard,
        }))
    }

    async fn conditional_update_pay_status(
        &self,
        id: OrderId,
        expected: PayStatus,
        new: PayStatus,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.lock_order(id).await;
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or(OrderStoreError::NotFound(id))?;

        if order.pay_status != expected {
            return Ok(false);
        }
        order.pay_status = new;
        order.apply_audit(at, actor, false);
        Ok(true)
    }

    async fn save_payment_intent(&self, intent: PaymentIntent) -> Result<Option<PaymentIntent>> {
        let _guard = self.lock_order(intent.order_id).await;
        let mut tables = self.tables.write().await;
        let status = tables
            .orders
            .get(&intent.order_id)
            .map(|o| o.status)
            .ok_or(OrderStoreError::NotFound(intent.order_id))?;

        if status != OrderStatus::AwaitingPayment {
            return Ok(None);
        }
        let live = tables.intents.entry(intent.order_id).or_insert(intent);
        Ok(Some(live.clone()))
    }

    async fn get_payment_intent(&self, id: OrderId) -> Result<Option<PaymentIntent>> {
        Ok(self.tables.read().await.intents.get(&id).cloned())
    }

    async fn transitions(&self, id: OrderId) -> Result<Vec<TransitionEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transitions
            .iter()
            .filter(|e| e.order_id == id)
            .cloned()
            .collect())
    }

    async fn find_by_status_created_before(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.status == status && o.created_at < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn query(&self, query: OrderQuery) -> Result<Page<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| {
                query.number.as_ref().is_none_or(|n| &o.number == n)
                    && query.user_id.is_none_or(|u| o.user_id == u)
                    && query.status.is_none_or(|s| o.status == s)
                    && query.from_timestamp.is_none_or(|from| o.created_at >= from)
                    && query.to_timestamp.is_none_or(|to| o.created_at <= to)
            })
            .cloned()
            .collect();

        // Newest first
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = orders.len() as u64;
        let records = orders
            .into_iter()
            .skip(query.offset())
            .take(query.page_size)
            .collect();

        Ok(Page { total, records })
    }

    async fn count_by_status(&self, status: OrderStatus) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.orders.values().filter(|o| o.status == status).count() as u64)
    }
}

struct InMemoryTransaction {
    order_id: OrderId,
    tables: Arc<RwLock<Tables>>,
    seq: Arc<AtomicI64>,
    staged: Option<(Order, TransitionEvent)>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    fn order_id(&self) -> OrderId {
        self.order_id
    }

    async fn conditional_update_status(&mut self, update: StatusUpdate) -> Result<UpdateOutcome> {
        if update.order_id != self.order_id {
            return Err(OrderStoreError::InvalidRecord(format!(
                "transaction for {} cannot update {}",
                self.order_id, update.order_id
            )));
        }

        let current = match self.staged {
            Some((ref order, _)) => order.clone(),
            None => self
                .tables
                .read()
                .await
                .orders
                .get(&update.order_id)
                .cloned()
                .ok_or(OrderStoreError::NotFound(update.order_id))?,
        };

        if current.status != update.expected {
            metrics::counter!("order_store_conditional_updates_total", "outcome" => "rejected")
                .increment(1);
            return Ok(UpdateOutcome::Rejected {
                current: current.status,
            });
        }
        validate_edge(&update)?;

        let order = current.with_update(&update);
        let mut event = update.to_event();
        event.seq = InMemoryOrderStore::next_seq(&self.seq);
        self.staged = Some((order.clone(), event.clone()));

        metrics::counter!("order_store_conditional_updates_total", "outcome" => "applied")
            .increment(1);
        Ok(UpdateOutcome::Applied { order, event })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction {
            tables,
            staged,
            _guard,
            ..
        } = *self;

        if let Some((order, event)) = staged {
            let mut tables = tables.write().await;
            if order.status != OrderStatus::AwaitingPayment {
                tables.intents.remove(&order.id);
            }
            tables.transitions.push(event);
            tables.orders.insert(order.id, order);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
