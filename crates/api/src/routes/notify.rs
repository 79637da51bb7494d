//! Payment gateway webhook.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use order_store::OrderStore;
use payment::NotifyEnvelope;
use reconciliation::CallbackAck;

use crate::AppState;

/// POST /notify/pay-success
///
/// Anything but 200 with a `SUCCESS` body makes the gateway redeliver.
pub async fn pay_success<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(envelope): Json<NotifyEnvelope>,
) -> (StatusCode, Json<CallbackAck>) {
    let Some(reconciler) = state.reconciler.as_ref() else {
        tracing::error!("Payment callback received but no API v3 key is configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(CallbackAck::failure("callback decryption not configured")),
        );
    };

    match reconciler.handle(&envelope).await {
        Ok(outcome) => {
            tracing::info!(event_id = ?envelope.id, ?outcome, "Payment callback acknowledged");
            (StatusCode::OK, Json(CallbackAck::success()))
        }
        Err(e) => {
            tracing::warn!(
                event_id = ?envelope.id,
                error = %e,
                "Payment callback not acknowledged"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck::failure(e.to_string())),
            )
        }
    }
}
