//! Reconciliation between the order lifecycle and the outside world.
//!
//! - `CallbackReconciler` applies authenticated payment callbacks
//! - `TimeoutSweeper` cancels unpaid orders and completes stuck deliveries

pub mod callback;
pub mod error;
pub mod sweeper;

pub use callback::{CallbackAck, CallbackOutcome, CallbackReconciler, PaymentNotification};
pub use error::{ReconcileError, Result};
pub use sweeper::{SweepJob, SweepReport, SweeperConfig, TimeoutSweeper};
