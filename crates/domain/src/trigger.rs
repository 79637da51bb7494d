//! The fixed transition table.

use common::{Actor, OrderStatus};
use serde::{Deserialize, Serialize};

/// Everything that can move an order from one status to another.
///
/// ```text
/// AWAITING_PAYMENT ──► TO_BE_CONFIRMED ──► CONFIRMED ──► DELIVERING ──► COMPLETED
///        │                    │
///        └────────────────────┴──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Submit,
    PaymentConfirmed,
    Confirm,
    Reject,
    Cancel,
    Dispatch,
    Complete,
    PaymentTimeout,
    DeliveryStuck,
}

impl Trigger {
    /// Statuses this trigger may fire from; empty for `Submit`, which creates.
    pub fn allowed_from(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Trigger::Submit => &[],
            Trigger::PaymentConfirmed => &[AwaitingPayment],
            Trigger::Confirm => &[ToBeConfirmed],
            Trigger::Reject => &[ToBeConfirmed],
            Trigger::Cancel => &[AwaitingPayment, ToBeConfirmed],
            Trigger::Dispatch => &[Confirmed],
            Trigger::Complete => &[Delivering],
            Trigger::PaymentTimeout => &[AwaitingPayment],
            Trigger::DeliveryStuck => &[Delivering],
        }
    }

    /// Status the order ends up in.
    pub fn target(&self) -> OrderStatus {
        match self {
            Trigger::Submit => OrderStatus::AwaitingPayment,
            Trigger::PaymentConfirmed => OrderStatus::ToBeConfirmed,
            Trigger::Confirm => OrderStatus::Confirmed,
            Trigger::Reject | Trigger::Cancel | Trigger::PaymentTimeout => OrderStatus::Cancelled,
            Trigger::Dispatch => OrderStatus::Delivering,
            Trigger::Complete | Trigger::DeliveryStuck => OrderStatus::Completed,
        }
    }

    pub fn can_fire_from(&self, status: OrderStatus) -> bool {
        self.allowed_from().contains(&status)
    }

    /// Whether `actor` may fire this trigger at all.
    pub fn permits(&self, actor: &Actor) -> bool {
        match self {
            Trigger::Submit => matches!(actor, Actor::User(_)),
            Trigger::PaymentConfirmed => matches!(actor, Actor::Gateway),
            Trigger::Confirm | Trigger::Reject | Trigger::Dispatch | Trigger::Complete => {
                matches!(actor, Actor::Admin(_))
            }
            Trigger::Cancel => matches!(actor, Actor::User(_) | Actor::Admin(_)),
            Trigger::PaymentTimeout | Trigger::DeliveryStuck => matches!(actor, Actor::Sweeper),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Submit => "submit",
            Trigger::PaymentConfirmed => "payment_confirmed",
            Trigger::Confirm => "confirm",
            Trigger::Reject => "reject",
            Trigger::Cancel => "cancel",
            Trigger::Dispatch => "dispatch",
            Trigger::Complete => "complete",
            Trigger::PaymentTimeout => "payment_timeout",
            Trigger::DeliveryStuck => "delivery_stuck",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
