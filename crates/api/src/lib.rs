//! HTTP surface of the order lifecycle engine.
//!
//! Provides the customer and back-office action endpoints, the payment
//! gateway webhook and the live push channel, with structured logging
//! (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broadcast::SessionRegistry;
use domain::OrderLifecycle;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use payment::NotifyCipher;
use reconciliation::CallbackReconciler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub lifecycle: Arc<OrderLifecycle<S>>,
    /// Absent when no API v3 key is configured; callbacks are then refused.
    pub reconciler: Option<CallbackReconciler<S>>,
    pub sessions: Arc<SessionRegistry>,
}

impl<S: OrderStore> AppState<S> {
    pub fn new(
        lifecycle: Arc<OrderLifecycle<S>>,
        cipher: Option<NotifyCipher>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            reconciler: cipher.map(|cipher| CallbackReconciler::new(lifecycle.clone(), cipher)),
            lifecycle,
            sessions,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{admin, notify, ops, user, ws};

    let metrics_router = Router::new()
        .route("/metrics", get(ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(ops::health::<S>))
        .route("/user/orders", post(user::submit::<S>).get(user::history::<S>))
        .route("/user/orders/{id}", get(user::get::<S>))
        .route("/user/orders/{id}/transitions", get(user::transitions::<S>))
        .route("/user/orders/{id}/pay", post(user::pay::<S>))
        .route("/user/orders/{id}/cancel", post(user::cancel::<S>))
        .route("/user/orders/{id}/remind", post(user::remind::<S>))
        .route("/admin/orders", get(admin::search::<S>))
        .route("/admin/orders/statistics", get(admin::statistics::<S>))
        .route("/admin/orders/{id}", get(admin::get::<S>))
        .route("/admin/orders/{id}/transitions", get(admin::transitions::<S>))
        .route("/admin/orders/{id}/confirm", post(admin::confirm::<S>))
        .route("/admin/orders/{id}/reject", post(admin::reject::<S>))
        .route("/admin/orders/{id}/cancel", post(admin::cancel::<S>))
        .route("/admin/orders/{id}/dispatch", post(admin::dispatch::<S>))
        .route("/admin/orders/{id}/complete", post(admin::complete::<S>))
        .route("/notify/pay-success", post(notify::pay_success::<S>))
        .route("/ws/{sid}", get(ws::connect::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
