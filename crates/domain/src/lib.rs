//! Order state machine.
//!
//! This crate provides:
//! - The fixed transition table (`Trigger`)
//! - `OrderLifecycle`, the only component allowed to change order status
//! - The `TransitionObserver` seam used to push committed transitions out

pub mod commands;
pub mod error;
pub mod lifecycle;
pub mod observer;
mod order_locks;
pub mod trigger;

pub use commands::{OrderStatistics, PaymentOutcome, SubmitOrder};
pub use error::{LifecycleError, Result};
pub use lifecycle::{
    AUTO_COMPLETE_REASON, AUTO_TIMEOUT_REASON, OrderLifecycle, USER_CANCEL_REASON, refund_number,
};
pub use observer::{NoopObserver, TransitionNotice, TransitionObserver};
pub use trigger::Trigger;
