use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus};
use domain::TransitionNotice;
use order_store::Order;
use serde::{Deserialize, Serialize};

/// A server-to-client push, serialized as one JSON text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// An order changed status.
    Transition {
        /// Transition log position; clients order by it within one order.
        seq: i64,
        order_id: OrderId,
        order_number: String,
        from: Option<OrderStatus>,
        to: OrderStatus,
        trigger: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    /// A customer chased an order.
    Reminder {
        order_id: OrderId,
        order_number: String,
        content: String,
    },
}

impl PushMessage {
    pub fn reminder(order: &Order) -> Self {
        PushMessage::Reminder {
            order_id: order.id,
            order_number: order.number.clone(),
            content: format!("Order {} is waiting", order.number),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Transition { .. } => "transition",
            PushMessage::Reminder { .. } => "reminder",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<TransitionNotice> for PushMessage {
    fn from(notice: TransitionNotice) -> Self {
        PushMessage::Transition {
            seq: notice.seq,
            order_id: notice.order_id,
            order_number: notice.order_number,
            from: notice.from,
            to: notice.to,
            trigger: notice.trigger,
            reason: notice.reason,
            at: notice.at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_payload_shape() {
        let message = PushMessage::Transition {
            seq: 7,
            order_id: OrderId::new(),
            order_number: "A1".to_string(),
            from: Some(OrderStatus::AwaitingPayment),
            to: OrderStatus::ToBeConfirmed,
            trigger: "payment_confirmed".to_string(),
            reason: None,
            at: Utc::now(),
        };

        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "transition");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["order_number"], "A1");
        assert_eq!(value["from"], "AWAITING_PAYMENT");
        assert_eq!(value["to"], "TO_BE_CONFIRMED");
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn creation_has_no_source_status() {
        let message = PushMessage::Transition {
            seq: 1,
            order_id: OrderId::new(),
            order_number: "A1".to_string(),
            from: None,
            to: OrderStatus::AwaitingPayment,
            trigger: "submit".to_string(),
            reason: None,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value["from"].is_null());
    }
}
