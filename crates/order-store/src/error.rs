use common::{OrderId, OrderStatus};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// No order with this id exists.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The business order number is already taken.
    #[error("Duplicate order number: {0}")]
    DuplicateOrderNumber(String),

    /// The requested edge is not part of the transition graph.
    #[error("Illegal status edge for order {order_id}: {from} -> {to}")]
    IllegalEdge {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A stored row could not be mapped back to a record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
