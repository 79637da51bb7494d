use thiserror::Error;

/// Failures talking to the payment gateway.
///
/// `Timeout`, `Transport` and `Server` are retryable; every other variant is
/// fatal and surfaced to the caller unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Gateway rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed gateway response: {0}")]
    MalformedResponse(String),

    #[error("Gateway response carries no prepay_id")]
    MissingPrepayId,

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Invalid merchant credential: {0}")]
    InvalidCredential(String),
}

impl GatewayError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::Transport(_) | GatewayError::Server { .. }
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Errors returned by [`crate::PaymentGateway`] operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Bad input, detected before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Validation(_) => false,
            PaymentError::Gateway(e) => e.is_retryable(),
        }
    }
}

/// Failures decoding an encrypted gateway notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("API v3 key must be 32 bytes, got {0}")]
    InvalidKey(usize),

    #[error("Nonce must be 12 bytes, got {0}")]
    InvalidNonce(usize),

    #[error("Ciphertext is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Notification failed authentication")]
    Authentication,

    #[error("Plaintext is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Server { status: 503 }.is_retryable());
        assert!(GatewayError::Transport("reset".into()).is_retryable());

        assert!(!GatewayError::MissingPrepayId.is_retryable());
        assert!(!GatewayError::MalformedResponse("eof".into()).is_retryable());
        assert!(
            !GatewayError::Rejected {
                status: 400,
                body: "{}".into()
            }
            .is_retryable()
        );
        assert!(!PaymentError::Validation("bad".into()).is_retryable());
    }
}
