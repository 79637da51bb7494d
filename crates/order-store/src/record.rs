//! Order records, the transition log entry and the payment intent.

use chrono::{DateTime, Utc};
use common::{Actor, Money, OrderId, OrderStatus, PayStatus, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pre-save hook populating audit fields.
///
/// Every store implementation calls this on insert and on each update
/// before writing, with the actor of the current request.
pub trait Auditable {
    fn apply_audit(&mut self, now: DateTime<Utc>, actor: Actor, is_insert: bool);
}

/// Delivery address captured at submit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub consignee: String,
    pub phone: String,
    pub detail: String,
}

/// Audit columns maintained through [`Auditable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
}

/// A persisted order.
///
/// `number` and `amount` never change after insert. `status` only changes
/// through a conditional status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// Business order number, unique across all orders.
    pub number: String,

    pub user_id: UserId,
    pub status: OrderStatus,
    pub pay_status: PayStatus,
    pub amount: Money,
    pub address: AddressSnapshot,
    pub remark: Option<String>,

    /// Gateway-side transaction id, set when payment is confirmed.
    pub transaction_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub checkout_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub dispatch_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,

    pub audit: AuditFields,
}

impl Order {
    /// Builds a fresh order in `AWAITING_PAYMENT`.
    pub fn new(
        number: impl Into<String>,
        user_id: UserId,
        amount: Money,
        address: AddressSnapshot,
        remark: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            number: number.into(),
            user_id,
            status: OrderStatus::AwaitingPayment,
            pay_status: PayStatus::Unpaid,
            amount,
            address,
            remark,
            transaction_id: None,
            created_at,
            checkout_time: None,
            cancel_time: None,
            cancel_reason: None,
            rejection_reason: None,
            dispatch_time: None,
            delivery_time: None,
            audit: AuditFields {
                created_by: None,
                updated_at: created_at,
                updated_by: None,
            },
        }
    }

    /// Returns a copy with the update's status and field changes applied.
    pub(crate) fn with_update(&self, update: &StatusUpdate) -> Order {
        let mut next = self.clone();
        next.status = update.new;
        update.changes.apply_to(&mut next);
        next.apply_audit(update.at, update.actor, false);
        next
    }
}

impl Auditable for Order {
    fn apply_audit(&mut self, now: DateTime<Utc>, actor: Actor, is_insert: bool) {
        if is_insert {
            self.audit.created_by = actor.audit_id();
        }
        self.audit.updated_at = now;
        self.audit.updated_by = actor.audit_id();
    }
}

/// Field changes written together with a status change.
///
/// Only `Some` values overwrite the stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderChanges {
    pub pay_status: Option<PayStatus>,
    pub transaction_id: Option<String>,
    pub checkout_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub dispatch_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
}

impl OrderChanges {
    fn apply_to(&self, order: &mut Order) {
        if let Some(pay_status) = self.pay_status {
            order.pay_status = pay_status;
        }
        if let Some(ref id) = self.transaction_id {
            order.transaction_id = Some(id.clone());
        }
        if self.checkout_time.is_some() {
            order.checkout_time = self.checkout_time;
        }
        if self.cancel_time.is_some() {
            order.cancel_time = self.cancel_time;
        }
        if let Some(ref reason) = self.cancel_reason {
            order.cancel_reason = Some(reason.clone());
        }
        if let Some(ref reason) = self.rejection_reason {
            order.rejection_reason = Some(reason.clone());
        }
        if self.dispatch_time.is_some() {
            order.dispatch_time = self.dispatch_time;
        }
        if self.delivery_time.is_some() {
            order.delivery_time = self.delivery_time;
        }
    }
}

/// A conditional status update: applies only if the live status equals `expected`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub order_id: OrderId,
    pub expected: OrderStatus,
    pub new: OrderStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,

    /// Name of the trigger that fired, recorded in the transition log.
    pub trigger: String,
    pub reason: Option<String>,
    pub changes: OrderChanges,
}

impl StatusUpdate {
    /// Builds the transition log entry this update records on success.
    pub(crate) fn to_event(&self) -> TransitionEvent {
        TransitionEvent {
            id: Uuid::new_v4(),
            seq: 0,
            order_id: self.order_id,
            from: Some(self.expected),
            to: self.new,
            trigger: self.trigger.clone(),
            actor: self.actor,
            reason: self.reason.clone(),
            occurred_at: self.at,
        }
    }
}

/// Append-only transition log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub id: Uuid,

    /// Log position assigned by the store when the entry is written.
    ///
    /// Strictly increasing in commit order for any one order; gaps are
    /// allowed. Zero on an entry that has not been stored yet.
    pub seq: i64,

    pub order_id: OrderId,

    /// `None` for the creating entry written at submit.
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub trigger: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionEvent {
    /// The creating entry for a freshly inserted order.
    pub fn created(order: &Order, actor: Actor) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            order_id: order.id,
            from: None,
            to: order.status,
            trigger: "submit".to_string(),
            actor,
            reason: None,
            occurred_at: order.created_at,
        }
    }
}

/// Prepay handle held while an order is awaiting payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub order_id: OrderId,
    pub prepay_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a conditional status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update committed (or is staged inside a transaction).
    Applied {
        order: Order,
        event: TransitionEvent,
    },
    /// The live status did not match the expected one; nothing was written.
    Rejected { current: OrderStatus },
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EmployeeId;

    fn sample_order() -> Order {
        Order::new(
            "A1",
            UserId::new(1),
            Money::from_cents(2500),
            AddressSnapshot {
                consignee: "Li".to_string(),
                phone: "13800000000".to_string(),
                detail: "1 Main St".to_string(),
            },
            None,
            Utc::now(),
        )
    }

    #[test]
    fn new_order_starts_unpaid_and_awaiting_payment() {
        let order = sample_order();
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.pay_status, PayStatus::Unpaid);
        assert!(order.checkout_time.is_none());
    }

    #[test]
    fn apply_audit_sets_creator_only_on_insert() {
        let mut order = sample_order();
        let now = Utc::now();
        order.apply_audit(now, Actor::User(UserId::new(1)), true);
        assert_eq!(order.audit.created_by, Some(1));

        order.apply_audit(now, Actor::Admin(EmployeeId::new(9)), false);
        assert_eq!(order.audit.created_by, Some(1));
        assert_eq!(order.audit.updated_by, Some(9));
        assert_eq!(order.audit.updated_at, now);
    }

    #[test]
    fn with_update_applies_only_present_changes() {
        let order = sample_order();
        let at = Utc::now();
        let update = StatusUpdate {
            order_id: order.id,
            expected: OrderStatus::AwaitingPayment,
            new: OrderStatus::ToBeConfirmed,
            actor: Actor::Gateway,
            at,
            trigger: "payment_confirmed".to_string(),
            reason: None,
            changes: OrderChanges {
                pay_status: Some(PayStatus::Paid),
                transaction_id: Some("TX-1".to_string()),
                checkout_time: Some(at),
                ..Default::default()
            },
        };

        let next = order.with_update(&update);
        assert_eq!(next.status, OrderStatus::ToBeConfirmed);
        assert_eq!(next.pay_status, PayStatus::Paid);
        assert_eq!(next.transaction_id.as_deref(), Some("TX-1"));
        assert_eq!(next.cancel_reason, None);
        assert_eq!(next.amount, order.amount);
        assert_eq!(next.number, order.number);

        let event = update.to_event();
        assert_eq!(event.from, Some(OrderStatus::AwaitingPayment));
        assert_eq!(event.to, OrderStatus::ToBeConfirmed);
        assert_eq!(event.actor, Actor::Gateway);
    }
}
