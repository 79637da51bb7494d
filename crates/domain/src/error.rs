//! Lifecycle error types.

use common::{OrderId, OrderStatus};
use order_store::OrderStoreError;
use payment::PaymentError;
use thiserror::Error;

/// Errors returned by [`crate::OrderLifecycle`] operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Bad input; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The precondition did not hold at commit time; carries the live status.
    #[error("Cannot {action} order {order_id} in status {current}")]
    InvalidTransition {
        order_id: OrderId,
        current: OrderStatus,
        action: &'static str,
    },

    /// No order with this id or number.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The actor may not perform this action on this order.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Store error: {0}")]
    Store(OrderStoreError),
}

impl From<OrderStoreError> for LifecycleError {
    fn from(e: OrderStoreError) -> Self {
        match e {
            OrderStoreError::NotFound(id) => LifecycleError::OrderNotFound(id.to_string()),
            other => LifecycleError::Store(other),
        }
    }
}

impl LifecycleError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, LifecycleError::InvalidTransition { .. })
    }
}

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;
