//! Response shapes.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, PayStatus};
use order_store::{AddressSnapshot, Order, Page};
use rust_decimal::Decimal;
use serde::Serialize;

/// An order as returned to clients; amounts are decimal strings.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub number: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub pay_status: PayStatus,
    pub amount: Decimal,
    pub address: AddressSnapshot,
    pub remark: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub checkout_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub dispatch_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            number: order.number,
            user_id: order.user_id.as_i64(),
            status: order.status,
            pay_status: order.pay_status,
            amount: order.amount.to_decimal(),
            address: order.address,
            remark: order.remark,
            transaction_id: order.transaction_id,
            created_at: order.created_at,
            checkout_time: order.checkout_time,
            cancel_time: order.cancel_time,
            cancel_reason: order.cancel_reason,
            rejection_reason: order.rejection_reason,
            dispatch_time: order.dispatch_time,
            delivery_time: order.delivery_time,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageView {
    pub total: u64,
    pub records: Vec<OrderView>,
}

impl From<Page<Order>> for PageView {
    fn from(page: Page<Order>) -> Self {
        Self {
            total: page.total,
            records: page.records.into_iter().map(OrderView::from).collect(),
        }
    }
}
