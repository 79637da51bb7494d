//! Shared types for the order lifecycle engine.
//!
//! Everything here is plain data: identifiers, money in minor units, the
//! order and pay status enums, and the actor context threaded through every
//! call chain.

pub mod context;
pub mod money;
pub mod status;
pub mod types;

pub use context::{Actor, RequestContext};
pub use money::{Money, MoneyError};
pub use status::{OrderStatus, PayStatus, UnknownStatus};
pub use types::{EmployeeId, OrderId, UserId};
