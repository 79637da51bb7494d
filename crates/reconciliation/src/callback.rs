//! Payment-success callback processing.

use std::sync::Arc;

use common::{OrderStatus, PayStatus, RequestContext};
use domain::{LifecycleError, OrderLifecycle, PaymentOutcome};
use order_store::OrderStore;
use payment::{NotifyCipher, NotifyEnvelope};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::Result;

/// Decrypted payment notification; only the fields we act on.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentNotification {
    pub out_trade_no: String,
    pub transaction_id: String,
    #[serde(default)]
    pub trade_state: Option<String>,
}

/// Body returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    pub code: String,
    pub message: String,
}

impl CallbackAck {
    /// The body that stops gateway retries.
    pub fn success() -> Self {
        Self {
            code: "SUCCESS".to_string(),
            message: "SUCCESS".to_string(),
        }
    }

    /// The body sent with a non-success status so the gateway retries.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: "FAIL".to_string(),
            message: message.into(),
        }
    }
}

/// What a callback amounted to; every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The order moved to `TO_BE_CONFIRMED`.
    Applied { order_number: String },
    /// Redelivery for an order already past `AWAITING_PAYMENT`.
    Duplicate { order_number: String },
    /// Payment arrived after the order was cancelled; it was refunded.
    LateRefunded { order_number: String },
    /// No such order; retrying would never find it.
    UnknownOrder { order_number: String },
    /// Not a successful payment.
    Ignored { order_number: String },
}

impl CallbackOutcome {
    fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Applied { .. } => "applied",
            CallbackOutcome::Duplicate { .. } => "duplicate",
            CallbackOutcome::LateRefunded { .. } => "late_refunded",
            CallbackOutcome::UnknownOrder { .. } => "unknown_order",
            CallbackOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Authenticates gateway callbacks and applies them to orders.
pub struct CallbackReconciler<S: OrderStore> {
    lifecycle: Arc<OrderLifecycle<S>>,
    cipher: NotifyCipher,
}

impl<S: OrderStore> CallbackReconciler<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>, cipher: NotifyCipher) -> Self {
        Self { lifecycle, cipher }
    }

    /// Processes one callback envelope.
    ///
    /// `Ok` means the outcome is durable and the gateway may be acknowledged;
    /// `Err` means nothing was written and the gateway should retry.
    pub async fn handle(&self, envelope: &NotifyEnvelope) -> Result<CallbackOutcome> {
        let ctx = RequestContext::gateway();
        let span = ctx.span();

        let result = self.process(&ctx, envelope).instrument(span).await;
        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        metrics::counter!("payment_callbacks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        envelope: &NotifyEnvelope,
    ) -> Result<CallbackOutcome> {
        let plaintext = self
            .cipher
            .decrypt(&envelope.resource)
            .inspect_err(|e| tracing::warn!(error = %e, "Rejecting unauthenticated callback"))?;
        let notification: PaymentNotification = serde_json::from_str(&plaintext)?;
        let order_number = notification.out_trade_no.clone();

        match notification.trade_state.as_deref() {
            None | Some("SUCCESS") => {}
            Some(state) => {
                tracing::info!(%order_number, trade_state = state, "Ignoring non-success callback");
                return Ok(CallbackOutcome::Ignored { order_number });
            }
        }

        let outcome = match self
            .lifecycle
            .payment_confirmed(ctx, &order_number, &notification.transaction_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(LifecycleError::OrderNotFound(_)) => {
                tracing::warn!(%order_number, "Callback for unknown order, acknowledging");
                return Ok(CallbackOutcome::UnknownOrder { order_number });
            }
            Err(e) => return Err(e.into()),
        };

        match outcome {
            PaymentOutcome::Applied(_) => Ok(CallbackOutcome::Applied { order_number }),
            PaymentOutcome::Duplicate(order)
                if order.status == OrderStatus::Cancelled
                    && order.pay_status == PayStatus::Unpaid =>
            {
                self.lifecycle.refund_late_payment(ctx, &order).await?;
                Ok(CallbackOutcome::LateRefunded { order_number })
            }
            PaymentOutcome::Duplicate(_) => Ok(CallbackOutcome::Duplicate { order_number }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_bodies() {
        let ok = serde_json::to_value(CallbackAck::success()).unwrap();
        assert_eq!(ok, serde_json::json!({"code": "SUCCESS", "message": "SUCCESS"}));

        let fail = CallbackAck::failure("decrypt failed");
        assert_eq!(fail.code, "FAIL");
    }

    #[test]
    fn notification_parses_gateway_plaintext() {
        let plaintext = r#"{
            "appid": "wx-app",
            "mchid": "1900000001",
            "out_trade_no": "A1",
            "transaction_id": "4200001",
            "trade_state": "SUCCESS",
            "amount": {"total": 2500, "currency": "CNY"}
        }"#;
        let n: PaymentNotification = serde_json::from_str(plaintext).unwrap();
        assert_eq!(n.out_trade_no, "A1");
        assert_eq!(n.transaction_id, "4200001");
    }
}
