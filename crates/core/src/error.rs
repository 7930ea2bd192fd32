//! Shared error taxonomy.
//!
//! Keep this focused on deterministic business/domain failures plus the small
//! set of cross-cutting operational categories (transient provider errors,
//! timeouts, ledger contention). Infrastructure-specific errors belong to the
//! store traits that produce them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type CoreResult<T> = Result<T, CoreError>;

/// Domain-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (bad input, non-retryable).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Balance too low for the requested debit (business rule, no retry).
    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: u64, available: u64 },

    /// Bad signature or token; rejected immediately, logged as a security event.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network/5xx/429 from an external provider; retried with backoff.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// A step exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Transaction contention exhausted retries; the whole request is safe to retry.
    #[error("ledger conflict: {0}")]
    LedgerConflict(String),

    /// A storage invariant was violated (e.g. missing parent project). Fatal.
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientProvider(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn ledger_conflict(msg: impl Into<String>) -> Self {
        Self::LedgerConflict(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        Self::StorageInconsistency(msg.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientProvider(_) | CoreError::LedgerConflict(_)
        )
    }

    /// The category recorded on a failed generation for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Validation(_) => ErrorCategory::Validation,
            CoreError::InsufficientCredits { .. } => ErrorCategory::InsufficientCredits,
            CoreError::Authentication(_) => ErrorCategory::Authentication,
            CoreError::TransientProvider(_) => ErrorCategory::Provider,
            CoreError::Timeout(_) => ErrorCategory::Timeout,
            CoreError::LedgerConflict(_) => ErrorCategory::Conflict,
            CoreError::StorageInconsistency(_) => ErrorCategory::Internal,
            CoreError::NotFound => ErrorCategory::Internal,
        }
    }
}

/// Category tag on a failed generation's `error_detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    InsufficientCredits,
    Authentication,
    Provider,
    Timeout,
    Conflict,
    Internal,
}

/// Structured failure record written to a terminal-failed generation so
/// clients can render a specific message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<&CoreError> for ErrorDetail {
    fn from(err: &CoreError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}
