use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Actor, OrderId, OrderStatus, PayStatus};

use crate::{
    Order, OrderQuery, OrderStoreError, Page, PaymentIntent, Result, StatusUpdate,
    TransitionEvent, UpdateOutcome,
};

/// An explicit transactional scope over one order.
///
/// Holds the order exclusively from the first read until `commit` or
/// `rollback`. Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait OrderTransaction: Send {
    /// The order this transaction is scoped to.
    fn order_id(&self) -> OrderId;

    /// Stages a conditional status update.
    ///
    /// Returns `Rejected` with the live status when it differs from
    /// `update.expected`; nothing is staged in that case.
    async fn conditional_update_status(&mut self, update: StatusUpdate) -> Result<UpdateOutcome>;

    /// Makes all staged writes durable.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all staged writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Core trait for order store implementations.
///
/// All implementations must be thread-safe (Send + Sync). The only way to
/// change an order's status is a conditional update, either through
/// [`OrderStoreExt::conditional_update_status`] or inside an
/// [`OrderTransaction`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order together with its creating transition entry.
    ///
    /// Fails with `DuplicateOrderNumber` if the number is taken.
    async fn insert(&self, order: Order, actor: Actor) -> Result<Order>;

    /// Looks up an order by id.
    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Looks up an order by its business number.
    async fn get_by_number(&self, number: &str) -> Result<Option<Order>>;

    /// Opens a transactional scope over one order.
    async fn begin(&self, id: OrderId) -> Result<Box<dyn OrderTransaction>>;

    /// Compare-and-set on the pay status alone; returns true if it applied.
    async fn conditional_update_pay_status(
        &self,
        id: OrderId,
        expected: PayStatus,
        new: PayStatus,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Stores a payment intent if the order is still awaiting payment and
    /// has no live intent yet.
    ///
    /// Returns the live intent, which is the earlier one when two callers
    /// race. Returns `None` (and stores nothing) once the order has left
    /// `AWAITING_PAYMENT`.
    async fn save_payment_intent(&self, intent: PaymentIntent) -> Result<Option<PaymentIntent>>;

    /// Returns the live payment intent, if any.
    async fn get_payment_intent(&self, id: OrderId) -> Result<Option<PaymentIntent>>;

    /// Transition log of one order, oldest first.
    async fn transitions(&self, id: OrderId) -> Result<Vec<TransitionEvent>>;

    /// Orders in `status` created strictly before `cutoff`, oldest first.
    async fn find_by_status_created_before(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>>;

    /// Orders matching a query, newest first.
    async fn query(&self, query: OrderQuery) -> Result<Page<Order>>;

    /// Number of orders currently in `status`.
    async fn count_by_status(&self, status: OrderStatus) -> Result<u64>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Single-step conditional status update.
    ///
    /// Read-current, check-precondition and write-new happen as one atomic
    /// unit: on `Applied` the status, field changes, transition entry and
    /// payment-intent removal are all durable; on `Rejected` nothing is.
    async fn conditional_update_status(&self, update: StatusUpdate) -> Result<UpdateOutcome> {
        let mut tx = self.begin(update.order_id).await?;
        let outcome = tx.conditional_update_status(update).await?;
        if outcome.is_applied() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    /// Loads an order, failing with `NotFound` if it does not exist.
    async fn load(&self, id: OrderId) -> Result<Order> {
        self.get_by_id(id)
            .await?
            .ok_or(OrderStoreError::NotFound(id))
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}

/// Rejects updates whose edge is not in the transition graph.
pub(crate) fn validate_edge(update: &StatusUpdate) -> Result<()> {
    if !update.expected.can_transition_to(update.new) {
        return Err(OrderStoreError::IllegalEdge {
            order_id: update.order_id,
            from: update.expected,
            to: update.new,
        });
    }
    Ok(())
}
