use domain::LifecycleError;
use payment::NotifyError;
use thiserror::Error;

/// Errors that keep a callback from being acknowledged or stop a sweep.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The notification failed authentication or decoding.
    #[error("Callback decryption failed: {0}")]
    Decrypt(#[from] NotifyError),

    /// The decrypted payload is not a payment notification.
    #[error("Malformed callback payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
