//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::LifecycleError;
use payment::PaymentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Lifecycle operation failure.
    Lifecycle(LifecycleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Lifecycle(err) => lifecycle_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn lifecycle_error_to_response(err: LifecycleError) -> (StatusCode, String) {
    let status = match &err {
        LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
        LifecycleError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LifecycleError::Payment(PaymentError::Validation(_)) => StatusCode::BAD_REQUEST,
        LifecycleError::Payment(PaymentError::Gateway(gateway)) if gateway.is_retryable() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LifecycleError::Payment(PaymentError::Gateway(_)) => StatusCode::BAD_GATEWAY,
        LifecycleError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        ApiError::Lifecycle(err)
    }
}
