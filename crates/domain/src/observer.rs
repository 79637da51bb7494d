//! Seam between committed transitions and whoever wants to hear about them.

use chrono::{DateTime, Utc};
use common::{Actor, OrderId, OrderStatus};
use order_store::{Order, TransitionEvent};
use serde::Serialize;

/// A transition that has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionNotice {
    /// Log position of the transition; increases in commit order per order.
    pub seq: i64,
    pub order_id: OrderId,
    pub order_number: String,
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub trigger: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionNotice {
    pub fn new(order: &Order, event: &TransitionEvent) -> Self {
        Self {
            seq: event.seq,
            order_id: order.id,
            order_number: order.number.clone(),
            from: event.from,
            to: event.to,
            trigger: event.trigger.clone(),
            actor: event.actor,
            reason: event.reason.clone(),
            at: event.occurred_at,
        }
    }
}

/// Receives notices after commit.
///
/// Implementations must return promptly and must not fail the caller; the
/// lifecycle invokes them on the commit path. Notices for one order arrive
/// in commit order: the lifecycle keeps the order locked until the call
/// returns.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, notice: TransitionNotice);

    /// A customer asked the shop to hurry up.
    fn on_reminder(&self, order: &Order);
}

/// Observer that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransitionObserver for NoopObserver {
    fn on_transition(&self, _notice: TransitionNotice) {}

    fn on_reminder(&self, _order: &Order) {}
}
