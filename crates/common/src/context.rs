//! Actor context passed explicitly through every call chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EmployeeId, UserId};

/// Who is driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A storefront user acting on their own order.
    User(UserId),
    /// A back-office employee.
    Admin(EmployeeId),
    /// The external payment gateway (asynchronous callback).
    Gateway,
    /// The background timeout sweeper.
    Sweeper,
}

impl Actor {
    /// Short label used in logs, metrics and the transition log.
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::User(_) => "user",
            Actor::Admin(_) => "admin",
            Actor::Gateway => "gateway",
            Actor::Sweeper => "sweeper",
        }
    }

    /// Numeric id recorded in audit columns; system actors have none.
    pub fn audit_id(&self) -> Option<i64> {
        match self {
            Actor::User(id) => Some(id.as_i64()),
            Actor::Admin(id) => Some(id.as_i64()),
            Actor::Gateway | Actor::Sweeper => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.audit_id() {
            Some(id) => write!(f, "{}:{id}", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Per-request context.
///
/// Established once when handling starts and dropped when handling ends,
/// on every exit path. Nothing reads the actor from ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    actor: Actor,
    request_id: Uuid,
    started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Creates a context for the given actor with a fresh request id.
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            request_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    /// Context for the gateway callback path.
    pub fn gateway() -> Self {
        Self::new(Actor::Gateway)
    }

    /// Context for a sweeper pass.
    pub fn sweeper() -> Self {
        Self::new(Actor::Sweeper)
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Span carrying the actor and request id; instrument request futures with it.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            actor = %self.actor,
        )
    }
}
