//! The order lifecycle service: the only mutator of order status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Actor, EmployeeId, Money, OrderId, OrderStatus, PayStatus, RequestContext, UserId};
use order_store::{
    Order, OrderChanges, OrderQuery, OrderStore, OrderStoreError, OrderStoreExt, Page,
    PaymentIntent, StatusUpdate, TransitionEvent, UpdateOutcome,
};
use payment::{PaymentGateway, PrepayHandle, PrepayRequest, RefundRequest};
use uuid::Uuid;

use crate::order_locks::OrderLocks;
use crate::{
    LifecycleError, NoopObserver, OrderStatistics, PaymentOutcome, Result, SubmitOrder,
    TransitionNotice, TransitionObserver, Trigger,
};

/// Reason recorded when an unpaid order times out.
pub const AUTO_TIMEOUT_REASON: &str = "auto-timeout";

/// Reason recorded when a delivery is force-completed.
pub const AUTO_COMPLETE_REASON: &str = "auto-complete";

const MAX_NUMBER_ATTEMPTS: u32 = 3;

/// Reason recorded when a user cancels without giving one.
pub const USER_CANCEL_REASON: &str = "cancelled by user";

/// Refund number used for every refund of an order.
///
/// An order is refunded at most once, so one deterministic number per order
/// lets the gateway drop repeats.
pub fn refund_number(order_number: &str) -> String {
    format!("RF{order_number}")
}

/// Service owning every order status change.
///
/// Every transition goes through the store's conditional update: the status
/// observed on load becomes the expected status at commit, so a concurrent
/// mutator makes this one fail with `InvalidTransition` instead of
/// overwriting. Within the process each order is also locked from the write
/// until its notice is published.
#[derive(Clone)]
pub struct OrderLifecycle<S: OrderStore> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    observer: Arc<dyn TransitionObserver>,
    locks: OrderLocks,
}

impl<S: OrderStore> OrderLifecycle<S> {
    /// Creates a lifecycle service with no observer attached.
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            gateway,
            observer: Arc::new(NoopObserver),
            locks: OrderLocks::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // User actions

    /// Creates an order in `AWAITING_PAYMENT` for the acting user.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn submit(&self, ctx: &RequestContext, cmd: SubmitOrder) -> Result<Order> {
        let actor = ctx.actor();
        let Actor::User(user_id) = actor else {
            return Err(forbidden(actor, Trigger::Submit.as_str()));
        };

        let amount =
            Money::from_decimal(cmd.amount).map_err(|e| LifecycleError::Validation(e.to_string()))?;
        if !amount.is_positive() {
            return Err(LifecycleError::Validation(format!(
                "order amount must be positive, got {}",
                cmd.amount
            )));
        }
        if cmd.address.consignee.trim().is_empty()
            || cmd.address.phone.trim().is_empty()
            || cmd.address.detail.trim().is_empty()
        {
            return Err(LifecycleError::Validation(
                "delivery address is incomplete".to_string(),
            ));
        }

        let (mut number, generated) = match cmd.number {
            Some(n) if n.trim().is_empty() => {
                return Err(LifecycleError::Validation(
                    "order number must not be blank".to_string(),
                ));
            }
            Some(n) => (n, false),
            None => (generate_number(ctx.started_at()), true),
        };

        let mut attempts = 0;
        let (order, _held) = loop {
            let candidate = Order::new(
                number.clone(),
                user_id,
                amount,
                cmd.address.clone(),
                cmd.remark.clone(),
                Utc::now(),
            );
            let held = self.locks.acquire(candidate.id).await;
            match self.store.insert(candidate, actor).await {
                Ok(order) => break (order, held),
                Err(OrderStoreError::DuplicateOrderNumber(_))
                    if generated && attempts < MAX_NUMBER_ATTEMPTS =>
                {
                    attempts += 1;
                    number = generate_number(Utc::now());
                }
                Err(OrderStoreError::DuplicateOrderNumber(n)) => {
                    return Err(LifecycleError::Validation(format!(
                        "order number {n} already exists"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        };

        let created = match self.store.transitions(order.id).await?.into_iter().next() {
            Some(event) => event,
            None => TransitionEvent::created(&order, actor),
        };
        self.publish(Trigger::Submit, &order, &created);
        Ok(order)
    }

    /// Obtains a prepay handle for an unpaid order.
    ///
    /// Re-signs the live payment intent if there is one; otherwise creates a
    /// prepay order at the gateway. Gateway failures leave the order as is.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn pay(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        payer_openid: &str,
    ) -> Result<PrepayHandle> {
        let user_id = require_user(ctx, "pay")?;
        let order = self.load_for(ctx, order_id).await?;
        if order.user_id != user_id {
            return Err(not_owner(order_id));
        }
        if order.status != OrderStatus::AwaitingPayment {
            return Err(LifecycleError::InvalidTransition {
                order_id,
                current: order.status,
                action: "pay",
            });
        }
        if payer_openid.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "payer identity is required".to_string(),
            ));
        }

        // Concurrent calls for one order queue here and reuse the first intent
        let _held = self.locks.acquire(order_id).await;
        if let Some(intent) = self.store.get_payment_intent(order_id).await? {
            tracing::debug!(prepay_id = %intent.prepay_id, "Reusing payment intent");
            return self.resign(intent);
        }

        let handle = self
            .gateway
            .initiate(PrepayRequest {
                order_number: order.number.clone(),
                amount: order.amount.to_decimal(),
                description: format!("Order {}", order.number),
                payer_openid: payer_openid.to_string(),
            })
            .await?;

        let intent = PaymentIntent {
            order_id,
            prepay_id: handle.prepay_id.clone(),
            created_at: Utc::now(),
        };
        match self.store.save_payment_intent(intent).await? {
            Some(live) if live.prepay_id == handle.prepay_id => Ok(handle),
            // Another instance stored its intent first
            Some(live) => {
                tracing::info!(prepay_id = %live.prepay_id, "Payment intent already stored");
                self.resign(live)
            }
            None => {
                let current = self.store.load(order_id).await?.status;
                Err(LifecycleError::InvalidTransition {
                    order_id,
                    current,
                    action: "pay",
                })
            }
        }
    }

    /// Cancels an order; a paid order is refunded in full.
    ///
    /// Users may cancel their own orders. Admins must give a reason.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        reason: Option<String>,
    ) -> Result<Order> {
        let order = self.load_for(ctx, order_id).await?;
        let reason = match (ctx.actor(), reason) {
            (_, Some(r)) if !r.trim().is_empty() => r,
            (Actor::User(_), _) => USER_CANCEL_REASON.to_string(),
            _ => {
                return Err(LifecycleError::Validation(
                    "cancel reason is required".to_string(),
                ));
            }
        };

        let now = Utc::now();
        let changes = OrderChanges {
            cancel_time: Some(now),
            cancel_reason: Some(reason.clone()),
            ..Default::default()
        };
        self.commit_maybe_refund(ctx, &order, Trigger::Cancel, reason, changes, now)
            .await
    }

    /// Asks the shop to hurry; notifies observers without any state change.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn remind(&self, ctx: &RequestContext, order_id: OrderId) -> Result<()> {
        let user_id = require_user(ctx, "remind")?;
        let order = self.load_for(ctx, order_id).await?;
        if order.user_id != user_id {
            return Err(not_owner(order_id));
        }
        if order.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                order_id,
                current: order.status,
                action: "remind",
            });
        }

        tracing::info!(order_number = %order.number, "Customer reminder");
        self.observer.on_reminder(&order);
        Ok(())
    }

    // Admin actions

    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn confirm(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        let order = self.load_for(ctx, order_id).await?;
        self.commit(ctx, &order, Trigger::Confirm, None, OrderChanges::default(), Utc::now())
            .await
    }

    /// Rejects a paid order awaiting confirmation; the payment is refunded.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
        reason: String,
    ) -> Result<Order> {
        if reason.trim().is_empty() {
            return Err(LifecycleError::Validation(
                "rejection reason is required".to_string(),
            ));
        }
        let order = self.load_for(ctx, order_id).await?;

        let now = Utc::now();
        let changes = OrderChanges {
            cancel_time: Some(now),
            rejection_reason: Some(reason.clone()),
            ..Default::default()
        };
        self.commit_maybe_refund(ctx, &order, Trigger::Reject, reason, changes, now)
            .await
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn dispatch(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        let order = self.load_for(ctx, order_id).await?;
        let now = Utc::now();
        let changes = OrderChanges {
            dispatch_time: Some(now),
            ..Default::default()
        };
        self.commit(ctx, &order, Trigger::Dispatch, None, changes, now)
            .await
    }

    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn complete(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        let order = self.load_for(ctx, order_id).await?;
        let now = Utc::now();
        let changes = OrderChanges {
            delivery_time: Some(now),
            ..Default::default()
        };
        self.commit(ctx, &order, Trigger::Complete, None, changes, now)
            .await
    }

    // Gateway and sweeper

    /// Applies a payment confirmation for an order number.
    ///
    /// An order that already left `AWAITING_PAYMENT` (including one that
    /// loses the race to a concurrent cancel) yields `Duplicate` and no write.
    #[tracing::instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor(), request_id = %ctx.request_id())
    )]
    pub async fn payment_confirmed(
        &self,
        ctx: &RequestContext,
        order_number: &str,
        transaction_id: &str,
    ) -> Result<PaymentOutcome> {
        if !Trigger::PaymentConfirmed.permits(&ctx.actor()) {
            return Err(forbidden(ctx.actor(), Trigger::PaymentConfirmed.as_str()));
        }

        let order = self
            .store
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| LifecycleError::OrderNotFound(order_number.to_string()))?;

        if order.status != OrderStatus::AwaitingPayment {
            tracing::info!(
                order_id = %order.id,
                status = %order.status,
                "Duplicate payment confirmation"
            );
            return Ok(PaymentOutcome::Duplicate(order));
        }

        let now = Utc::now();
        let changes = OrderChanges {
            pay_status: Some(PayStatus::Paid),
            transaction_id: Some(transaction_id.to_string()),
            checkout_time: Some(now),
            ..Default::default()
        };

        match self
            .commit(ctx, &order, Trigger::PaymentConfirmed, None, changes, now)
            .await
        {
            Ok(order) => Ok(PaymentOutcome::Applied(order)),
            Err(LifecycleError::InvalidTransition { .. }) => {
                let order = self.store.load(order.id).await?;
                Ok(PaymentOutcome::Duplicate(order))
            }
            Err(e) => Err(e),
        }
    }

    /// Refunds money captured for an order that was cancelled while unpaid.
    ///
    /// Returns true if this call moved the pay status to `REFUNDED`.
    #[tracing::instrument(
        skip(self, ctx, order),
        fields(order_id = %order.id, actor = %ctx.actor())
    )]
    pub async fn refund_late_payment(&self, ctx: &RequestContext, order: &Order) -> Result<bool> {
        if order.status != OrderStatus::Cancelled || order.pay_status != PayStatus::Unpaid {
            return Ok(false);
        }

        self.gateway
            .refund(RefundRequest {
                order_number: order.number.clone(),
                refund_number: refund_number(&order.number),
                refund_amount: order.amount.to_decimal(),
                total_amount: order.amount.to_decimal(),
            })
            .await?;

        let applied = self
            .store
            .conditional_update_pay_status(
                order.id,
                PayStatus::Unpaid,
                PayStatus::Refunded,
                ctx.actor(),
                Utc::now(),
            )
            .await?;

        tracing::warn!(
            order_number = %order.number,
            applied,
            "Refunded payment for cancelled order"
        );
        Ok(applied)
    }

    /// Cancels an order that stayed unpaid past its deadline.
    pub async fn expire_unpaid(&self, ctx: &RequestContext, order: &Order) -> Result<Order> {
        let now = Utc::now();
        let changes = OrderChanges {
            cancel_time: Some(now),
            cancel_reason: Some(AUTO_TIMEOUT_REASON.to_string()),
            ..Default::default()
        };
        self.commit(
            ctx,
            order,
            Trigger::PaymentTimeout,
            Some(AUTO_TIMEOUT_REASON.to_string()),
            changes,
            now,
        )
        .await
    }

    /// Completes an order stuck in delivery.
    pub async fn auto_complete(&self, ctx: &RequestContext, order: &Order) -> Result<Order> {
        let now = Utc::now();
        let changes = OrderChanges {
            delivery_time: Some(now),
            ..Default::default()
        };
        self.commit(
            ctx,
            order,
            Trigger::DeliveryStuck,
            Some(AUTO_COMPLETE_REASON.to_string()),
            changes,
            now,
        )
        .await
    }

    // Queries

    /// Loads an order the actor may see.
    pub async fn get(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        self.load_for(ctx, order_id).await
    }

    /// Transition log of an order the actor may see, oldest first.
    pub async fn transitions(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> Result<Vec<TransitionEvent>> {
        let order = self.load_for(ctx, order_id).await?;
        Ok(self.store.transitions(order.id).await?)
    }

    /// The acting user's orders, newest first.
    pub async fn history(
        &self,
        ctx: &RequestContext,
        page: usize,
        page_size: usize,
        status: Option<OrderStatus>,
    ) -> Result<Page<Order>> {
        let user_id = require_user(ctx, "list orders")?;
        let mut query = OrderQuery::for_user(user_id).page(page, page_size);
        query.status = status;
        Ok(self.store.query(query).await?)
    }

    /// Back-office condition search.
    pub async fn search(&self, ctx: &RequestContext, query: OrderQuery) -> Result<Page<Order>> {
        require_admin(ctx, "search orders")?;
        Ok(self.store.query(query).await?)
    }

    /// Counts of orders waiting on the back office.
    pub async fn statistics(&self, ctx: &RequestContext) -> Result<OrderStatistics> {
        require_admin(ctx, "view statistics")?;
        Ok(OrderStatistics {
            to_be_confirmed: self
                .store
                .count_by_status(OrderStatus::ToBeConfirmed)
                .await?,
            confirmed: self.store.count_by_status(OrderStatus::Confirmed).await?,
            delivering: self.store.count_by_status(OrderStatus::Delivering).await?,
        })
    }

    // Internals

    fn resign(&self, intent: PaymentIntent) -> Result<PrepayHandle> {
        let client = self.gateway.sign_client_payment(&intent.prepay_id)?;
        Ok(PrepayHandle {
            prepay_id: intent.prepay_id,
            client,
        })
    }

    async fn load_for(&self, ctx: &RequestContext, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| LifecycleError::OrderNotFound(order_id.to_string()))?;

        match ctx.actor() {
            Actor::User(user_id) if order.user_id != user_id => Err(not_owner(order_id)),
            _ => Ok(order),
        }
    }

    /// Checks the trigger against the observed order and builds the update.
    fn prepare(
        &self,
        ctx: &RequestContext,
        order: &Order,
        trigger: Trigger,
        reason: Option<String>,
        changes: OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<StatusUpdate> {
        let actor = ctx.actor();
        if !trigger.permits(&actor) {
            return Err(forbidden(actor, trigger.as_str()));
        }
        if !trigger.can_fire_from(order.status) {
            return Err(LifecycleError::InvalidTransition {
                order_id: order.id,
                current: order.status,
                action: trigger.as_str(),
            });
        }

        Ok(StatusUpdate {
            order_id: order.id,
            expected: order.status,
            new: trigger.target(),
            actor,
            at,
            trigger: trigger.as_str().to_string(),
            reason,
            changes,
        })
    }

    async fn commit(
        &self,
        ctx: &RequestContext,
        order: &Order,
        trigger: Trigger,
        reason: Option<String>,
        changes: OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let update = self.prepare(ctx, order, trigger, reason, changes, at)?;
        let _held = self.locks.acquire(order.id).await;
        let outcome = self.store.conditional_update_status(update).await?;
        let (order, event) = applied(order.id, trigger, outcome)?;

        self.publish(trigger, &order, &event);
        Ok(order)
    }

    /// Commits a cancelling trigger, refunding first when the order is paid.
    ///
    /// The status update is staged inside a transaction, the refund is
    /// issued while the order is held, and the update commits only if the
    /// refund succeeded.
    async fn commit_maybe_refund(
        &self,
        ctx: &RequestContext,
        order: &Order,
        trigger: Trigger,
        reason: String,
        mut changes: OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        if order.pay_status != PayStatus::Paid {
            return self
                .commit(ctx, order, trigger, Some(reason), changes, at)
                .await;
        }

        changes.pay_status = Some(PayStatus::Refunded);
        let update = self.prepare(ctx, order, trigger, Some(reason), changes, at)?;

        let _held = self.locks.acquire(order.id).await;
        let mut tx = self.store.begin(order.id).await?;
        let outcome = tx.conditional_update_status(update).await?;
        let (updated, event) = match applied(order.id, trigger, outcome) {
            Ok(pair) => pair,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        let refund = self
            .gateway
            .refund(RefundRequest {
                order_number: updated.number.clone(),
                refund_number: refund_number(&updated.number),
                refund_amount: updated.amount.to_decimal(),
                total_amount: updated.amount.to_decimal(),
            })
            .await;

        if let Err(e) = refund {
            tracing::warn!(order_id = %order.id, error = %e, "Refund failed, rolling back");
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(order_id = %order.id, error = %rollback, "Rollback failed");
            }
            return Err(e.into());
        }

        tx.commit().await?;
        self.publish(trigger, &updated, &event);
        Ok(updated)
    }

    fn publish(&self, trigger: Trigger, order: &Order, event: &TransitionEvent) {
        metrics::counter!("order_transitions_total", "trigger" => trigger.as_str()).increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.number,
            from = ?event.from,
            to = %event.to,
            actor = %event.actor,
            "Order transitioned"
        );
        self.observer
            .on_transition(TransitionNotice::new(order, event));
    }
}

fn applied(
    order_id: OrderId,
    trigger: Trigger,
    outcome: UpdateOutcome,
) -> Result<(Order, TransitionEvent)> {
    match outcome {
        UpdateOutcome::Applied { order, event } => Ok((order, event)),
        UpdateOutcome::Rejected { current } => {
            metrics::counter!("order_transition_conflicts_total", "trigger" => trigger.as_str())
                .increment(1);
            tracing::info!(
                %order_id,
                %current,
                %trigger,
                "Transition precondition no longer holds"
            );
            Err(LifecycleError::InvalidTransition {
                order_id,
                current,
                action: trigger.as_str(),
            })
        }
    }
}

fn require_user(ctx: &RequestContext, action: &str) -> Result<UserId> {
    match ctx.actor() {
        Actor::User(user_id) => Ok(user_id),
        other => Err(forbidden(other, action)),
    }
}

fn require_admin(ctx: &RequestContext, action: &str) -> Result<EmployeeId> {
    match ctx.actor() {
        Actor::Admin(employee_id) => Ok(employee_id),
        other => Err(forbidden(other, action)),
    }
}

fn forbidden(actor: Actor, action: &str) -> LifecycleError {
    LifecycleError::Forbidden(format!("{actor} may not {action}"))
}

fn not_owner(order_id: OrderId) -> LifecycleError {
    LifecycleError::Forbidden(format!("order {order_id} belongs to another user"))
}

/// Millisecond timestamp plus six random digits.
fn generate_number(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().as_u128() % 1_000_000;
    format!("{}{suffix:06}", at.format("%Y%m%d%H%M%S%3f"))
}
