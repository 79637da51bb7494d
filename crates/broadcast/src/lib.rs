//! Real-time notification of order transitions.
//!
//! `SessionRegistry` tracks live connections; `Broadcaster` is plugged into
//! the lifecycle as its `TransitionObserver` and pushes `PushMessage`s to
//! every registered session.

pub mod broadcaster;
pub mod message;
pub mod registry;

pub use broadcaster::Broadcaster;
pub use message::PushMessage;
pub use registry::{ConnectionId, SessionId, SessionRegistry, SessionSender};
