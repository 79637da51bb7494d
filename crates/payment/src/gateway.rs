use async_trait::async_trait;
use common::Money;
use rand::{Rng, distributions::Alphanumeric};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PaymentError, Result};

/// Currency sent with every amount.
pub const CURRENCY: &str = "CNY";

/// Inputs for creating a gateway prepay order.
#[derive(Debug, Clone)]
pub struct PrepayRequest {
    pub order_number: String,
    pub amount: Decimal,
    pub description: String,
    /// Payer identity at the gateway (the storefront openid).
    pub payer_openid: String,
}

/// Parameters the storefront passes to the native payment UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayment {
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

/// Gateway prepay handle plus the signed client package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepayHandle {
    pub prepay_id: String,
    pub client: ClientPayment,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_number: String,
    /// Merchant-side refund number; the gateway refunds each number once.
    pub refund_number: String,
    pub refund_amount: Decimal,
    pub total_amount: Decimal,
}

impl RefundRequest {
    /// Converts and checks both amounts; returns `(refund, total)` in minor units.
    ///
    /// Both must be positive and the refund must not exceed the total.
    pub fn minor_units(&self) -> Result<(Money, Money)> {
        let refund = to_minor_units(self.refund_amount)?;
        let total = to_minor_units(self.total_amount)?;

        if !refund.is_positive() || !total.is_positive() {
            return Err(PaymentError::Validation(format!(
                "refund amounts must be positive (refund {refund}, total {total})"
            )));
        }
        if refund > total {
            return Err(PaymentError::Validation(format!(
                "refund {refund} exceeds total {total}"
            )));
        }
        Ok((refund, total))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_number: String,
    /// Gateway-side refund id, when the gateway returned one.
    pub refund_id: Option<String>,
    pub status: Option<String>,
}

/// The external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a prepay order and signs the client package for it.
    async fn initiate(&self, request: PrepayRequest) -> Result<PrepayHandle>;

    /// Signs a fresh client package for an existing prepay handle.
    fn sign_client_payment(&self, prepay_id: &str) -> Result<ClientPayment>;

    /// Submits a refund. Amounts are validated before any network call.
    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt>;
}

/// Decimal amount to minor units, rounding half-up at two decimals.
pub fn to_minor_units(amount: Decimal) -> Result<Money> {
    Money::from_decimal(amount).map_err(|e| PaymentError::Validation(e.to_string()))
}

/// 32-character alphanumeric nonce.
pub fn nonce_str() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
