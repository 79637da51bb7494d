//! `TransitionObserver` that fans committed transitions out to sessions.

use std::sync::Arc;

use domain::{TransitionNotice, TransitionObserver};
use order_store::Order;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{PushMessage, SessionRegistry};

/// Feeds a single dispatcher queue; never blocks the commit path.
///
/// One queue keeps per-session delivery in commit order.
#[derive(Clone)]
pub struct Broadcaster {
    queue: mpsc::UnboundedSender<PushMessage>,
}

impl Broadcaster {
    /// Starts the dispatcher task.
    ///
    /// The task ends once every `Broadcaster` clone has been dropped and the
    /// queue is drained.
    pub fn spawn(registry: Arc<SessionRegistry>) -> (Self, JoinHandle<()>) {
        let (queue, mut rx) = mpsc::unbounded_channel::<PushMessage>();

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let delivered = registry.broadcast(&message);
                metrics::counter!("broadcast_messages_total").increment(delivered as u64);
            }
            tracing::debug!("Broadcast dispatcher stopped");
        });

        (Self { queue }, handle)
    }

    fn enqueue(&self, message: PushMessage) {
        if self.queue.send(message).is_err() {
            tracing::debug!("Broadcast dispatcher gone, dropping message");
        }
    }
}

impl TransitionObserver for Broadcaster {
    fn on_transition(&self, notice: TransitionNotice) {
        self.enqueue(PushMessage::from(notice));
    }

    fn on_reminder(&self, order: &Order) {
        self.enqueue(PushMessage::reminder(order));
    }
}
