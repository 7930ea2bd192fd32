//! Provider-facing error taxonomy.

use polyform_core::CoreError;
use thiserror::Error;

/// Failure reported by (or on behalf of) an external provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider rejected the input (4xx-class). Not retryable.
    #[error("provider rejected input: {0}")]
    Validation(String),

    /// Bad signature or credentials. Not retryable; logged as a security
    /// event by the caller.
    #[error("provider authentication failed: {0}")]
    Authentication(String),

    /// Connection reset, timeout, 429 or 5xx. Retryable with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Webhook payload that does not parse. Not retryable.
    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Validation(msg) | ProviderError::Malformed(msg) => {
                CoreError::Validation(msg)
            }
            ProviderError::Authentication(msg) => CoreError::Authentication(msg),
            ProviderError::Transient(msg) => CoreError::TransientProvider(msg),
        }
    }
}

/// How a webhook handler answers the caller. Providers redeliver on 5xx, so
/// every failure must be classified: `Rejected` tells them to stop,
/// `Retryable` tells them to try again later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    /// Permanent: bad signature, unparseable body, mismatched data. Maps to
    /// a 4xx response.
    #[error("webhook rejected: {0}")]
    Rejected(String),

    /// Temporary: storage trouble or a record the delivery outran. Maps to a
    /// 5xx response so the provider redelivers.
    #[error("webhook deferred: {0}")]
    Retryable(String),
}

impl WebhookError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Retryable(_))
    }
}

impl From<ProviderError> for WebhookError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => WebhookError::Retryable(msg),
            other => WebhookError::Rejected(other.to_string()),
        }
    }
}
