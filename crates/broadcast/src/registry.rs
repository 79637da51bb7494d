//! Live session registry.
//!
//! Maps session ids to the sending half of each connection's outbound queue.
//! Connection tasks own the socket; the registry only ever holds senders.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::PushMessage;

/// Outbound queue of one connection.
pub type SessionSender = mpsc::UnboundedSender<PushMessage>;

/// Opaque id chosen by the client.
pub type SessionId = String;

/// Distinguishes successive connections that reuse a session id.
pub type ConnectionId = u64;

pub struct SessionRegistry {
    sessions: DashMap<SessionId, (ConnectionId, SessionSender)>,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection, replacing any earlier one under the same id.
    pub fn add(&self, session_id: impl Into<SessionId>, tx: SessionSender) -> ConnectionId {
        let session_id = session_id.into();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        if self
            .sessions
            .insert(session_id.clone(), (conn_id, tx))
            .is_some()
        {
            tracing::info!(%session_id, conn_id, "Session reconnected, replacing connection");
        } else {
            tracing::info!(%session_id, conn_id, sessions = self.sessions.len(), "Session added");
        }
        conn_id
    }

    /// Removes a session if it still belongs to `conn_id`.
    pub fn remove(&self, session_id: &str, conn_id: ConnectionId) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, (current, _)| *current == conn_id)
            .is_some();
        if removed {
            tracing::info!(session_id, conn_id, "Session removed");
        }
        removed
    }

    /// Queues `message` on every session; returns how many accepted it.
    ///
    /// A session whose queue is closed is dropped from the registry.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.sessions.iter() {
            let (conn_id, tx) = entry.value();
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push((entry.key().clone(), *conn_id));
            }
        }

        // Removal happens after iteration; DashMap shards are still read-locked inside it.
        for (session_id, conn_id) in dead {
            if self.remove(&session_id, conn_id) {
                tracing::warn!(%session_id, "Dropped session after failed push");
                metrics::counter!("broadcast_sessions_dropped_total").increment(1);
            }
        }

        tracing::debug!(kind = message.kind(), delivered, "Message broadcast");
        delivered
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
