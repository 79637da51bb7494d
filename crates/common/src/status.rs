//! Order and pay status enums.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A status code or name that does not map to a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// The status of an order in its lifecycle.
///
/// ```text
/// AwaitingPayment ──► ToBeConfirmed ──► Confirmed ──► Delivering ──► Completed
///        │                  │
///        └──────────────────┴──► Cancelled
/// ```
///
/// Status only moves forward along these edges; it never returns to an
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, waiting for the gateway to confirm payment.
    #[default]
    AwaitingPayment,

    /// Paid, waiting for the kitchen to accept.
    ToBeConfirmed,

    /// Accepted by the kitchen.
    Confirmed,

    /// Out for delivery.
    Delivering,

    /// Delivered (terminal state).
    Completed,

    /// Cancelled or rejected (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::AwaitingPayment,
        OrderStatus::ToBeConfirmed,
        OrderStatus::Confirmed,
        OrderStatus::Delivering,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Returns true if `next` is a legal edge out of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (AwaitingPayment, ToBeConfirmed)
                | (AwaitingPayment, Cancelled)
                | (ToBeConfirmed, Confirmed)
                | (ToBeConfirmed, Cancelled)
                | (Confirmed, Delivering)
                | (Delivering, Completed)
        )
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Numeric code used by the persistent store.
    pub fn code(&self) -> i16 {
        match self {
            OrderStatus::AwaitingPayment => 1,
            OrderStatus::ToBeConfirmed => 2,
            OrderStatus::Confirmed => 3,
            OrderStatus::Delivering => 4,
            OrderStatus::Completed => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::ToBeConfirmed => "TO_BE_CONFIRMED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Delivering => "DELIVERING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl TryFrom<i16> for OrderStatus {
    type Error = UnknownStatus;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        OrderStatus::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| UnknownStatus(code.to_string()))
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether money has moved for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayStatus {
    #[default]
    Unpaid,
    Paid,
    Refunded,
}

impl PayStatus {
    pub fn code(&self) -> i16 {
        match self {
            PayStatus::Unpaid => 0,
            PayStatus::Paid => 1,
            PayStatus::Refunded => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayStatus::Unpaid => "UNPAID",
            PayStatus::Paid => "PAID",
            PayStatus::Refunded => "REFUNDED",
        }
    }
}

impl TryFrom<i16> for PayStatus {
    type Error = UnknownStatus;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PayStatus::Unpaid),
            1 => Ok(PayStatus::Paid),
            2 => Ok(PayStatus::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for PayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_awaiting_payment() {
        assert_eq!(OrderStatus::default(), OrderStatus::AwaitingPayment);
    }

    #[test]
    fn test_forward_edges() {
        use OrderStatus::*;
        assert!(AwaitingPayment.can_transition_to(ToBeConfirmed));
        assert!(AwaitingPayment.can_transition_to(Cancelled));
        assert!(ToBeConfirmed.can_transition_to(Confirmed));
        assert!(ToBeConfirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Delivering));
        assert!(Delivering.can_transition_to(Completed));
    }

    #[test]
    fn test_no_backward_or_terminal_edges() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                if from.can_transition_to(to) {
                    assert!(
                        to.code() > from.code(),
                        "{from} -> {to} moves backwards"
                    );
                    assert!(!from.is_terminal());
                }
            }
        }
        assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivering.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
        assert!(!OrderStatus::Delivering.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_code_roundtrip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::try_from(status.code()).unwrap(), status);
        }
        assert!(OrderStatus::try_from(0).is_err());
        assert_eq!(PayStatus::try_from(2).unwrap(), PayStatus::Refunded);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(
            "to_be_confirmed".parse::<OrderStatus>().unwrap(),
            OrderStatus::ToBeConfirmed
        );
        assert_eq!(OrderStatus::Delivering.to_string(), "DELIVERING");
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::ToBeConfirmed).unwrap();
        assert_eq!(json, "\"TO_BE_CONFIRMED\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::ToBeConfirmed);
    }
}
