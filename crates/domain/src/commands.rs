//! Inputs to lifecycle operations.

use order_store::AddressSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Places a new order for the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrder {
    /// Business number; generated when absent.
    #[serde(default)]
    pub number: Option<String>,

    pub amount: Decimal,
    pub address: AddressSnapshot,

    #[serde(default)]
    pub remark: Option<String>,
}

impl SubmitOrder {
    pub fn new(amount: Decimal, address: AddressSnapshot) -> Self {
        Self {
            number: None,
            amount,
            address,
            remark: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }
}

/// Per-status counts for the back office.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatistics {
    pub to_be_confirmed: u64,
    pub confirmed: u64,
    pub delivering: u64,
}

/// Result of applying a payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The order moved to `TO_BE_CONFIRMED`.
    Applied(order_store::Order),
    /// The order had already left `AWAITING_PAYMENT`; nothing was written.
    Duplicate(order_store::Order),
}

impl PaymentOutcome {
    pub fn order(&self) -> &order_store::Order {
        match self {
            PaymentOutcome::Applied(order) | PaymentOutcome::Duplicate(order) => order,
        }
    }
}
