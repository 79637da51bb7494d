use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::Money;
use dashmap::DashMap;

use crate::{
    ClientPayment, GatewayError, PaymentError, PaymentGateway, PrepayHandle, PrepayRequest,
    RefundReceipt, RefundRequest, Result, gateway::to_minor_units,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Endpoint {
    Prepay,
    Refund,
}

/// In-process gateway for development and tests.
///
/// Prepay ids are derived from the order number. Refunds are recorded per
/// refund number, and a repeated refund number returns the first receipt.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    refunds: Arc<DashMap<String, (String, Money)>>,
    failures: Arc<DashMap<Endpoint, GatewayError>>,
    initiate_calls: Arc<AtomicUsize>,
    refund_calls: Arc<AtomicUsize>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every prepay call fail with `error` until cleared.
    pub fn fail_initiate(&self, error: GatewayError) {
        self.failures.insert(Endpoint::Prepay, error);
    }

    /// Makes every refund call fail with `error` until cleared.
    pub fn fail_refund(&self, error: GatewayError) {
        self.failures.insert(Endpoint::Refund, error);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Prepay calls that reached the gateway.
    pub fn initiate_calls(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    /// Refund calls that reached the gateway.
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Refunded amount for an order, summed over distinct refund numbers.
    pub fn refunded(&self, order_number: &str) -> Money {
        self.refunds
            .iter()
            .filter(|entry| entry.value().0 == order_number)
            .fold(Money::zero(), |acc, entry| acc + entry.value().1)
    }

    fn check(&self, endpoint: Endpoint) -> std::result::Result<(), GatewayError> {
        match self.failures.get(&endpoint) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(&self, request: PrepayRequest) -> Result<PrepayHandle> {
        let total = to_minor_units(request.amount)?;
        if !total.is_positive() {
            return Err(PaymentError::Validation(format!(
                "payment amount must be positive, got {total}"
            )));
        }

        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Endpoint::Prepay)?;

        let prepay_id = format!("prepay-{}", request.order_number);
        let client = self.sign_client_payment(&prepay_id)?;
        Ok(PrepayHandle { prepay_id, client })
    }

    fn sign_client_payment(&self, prepay_id: &str) -> Result<ClientPayment> {
        Ok(ClientPayment {
            time_stamp: chrono::Utc::now().timestamp().to_string(),
            nonce_str: crate::gateway::nonce_str(),
            package: format!("prepay_id={prepay_id}"),
            sign_type: "RSA".to_string(),
            pay_sign: "in-memory".to_string(),
        })
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt> {
        let (refund, _) = request.minor_units()?;

        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.check(Endpoint::Refund)?;

        self.refunds
            .entry(request.refund_number.clone())
            .or_insert((request.order_number, refund));

        Ok(RefundReceipt {
            refund_id: Some(format!("refund-{}", request.refund_number)),
            refund_number: request.refund_number,
            status: Some("PROCESSING".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prepay(number: &str) -> PrepayRequest {
        PrepayRequest {
            order_number: number.to_string(),
            amount: dec!(25.00),
            description: "order".to_string(),
            payer_openid: "openid".to_string(),
        }
    }

    fn refund(number: &str, refund_number: &str) -> RefundRequest {
        RefundRequest {
            order_number: number.to_string(),
            refund_number: refund_number.to_string(),
            refund_amount: dec!(25.00),
            total_amount: dec!(25.00),
        }
    }

    #[tokio::test]
    async fn initiate_returns_prepay_package() {
        let gateway = InMemoryPaymentGateway::new();
        let handle = gateway.initiate(prepay("A1")).await.unwrap();

        assert_eq!(handle.prepay_id, "prepay-A1");
        assert_eq!(handle.client.package, "prepay_id=prepay-A1");
        assert_eq!(gateway.initiate_calls(), 1);
    }

    #[tokio::test]
    async fn configured_failure_is_returned() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.fail_initiate(GatewayError::Timeout);

        let err = gateway.initiate(prepay("A1")).await.unwrap_err();
        assert!(err.is_retryable());

        gateway.clear_failures();
        assert!(gateway.initiate(prepay("A1")).await.is_ok());
    }

    #[tokio::test]
    async fn refund_numbers_are_refunded_once() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.refund(refund("A1", "RFA1")).await.unwrap();
        gateway.refund(refund("A1", "RFA1")).await.unwrap();

        assert_eq!(gateway.refund_calls(), 2);
        assert_eq!(gateway.refunded("A1"), Money::from_cents(2500));
    }

    #[tokio::test]
    async fn invalid_refund_never_reaches_gateway() {
        let gateway = InMemoryPaymentGateway::new();
        let mut request = refund("A1", "RFA1");
        request.refund_amount = dec!(30.00);
        request.total_amount = dec!(20.00);

        let err = gateway.refund(request).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(gateway.refund_calls(), 0);
    }
}
