use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use polyform_core::CoreError;
use polyform_providers::WebhookError;

/// Map a domain error onto a status and stable error code.
pub fn core_error_to_response(err: CoreError) -> axum::response::Response {
    match err {
        CoreError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        CoreError::InsufficientCredits {
            required,
            available,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            axum::Json(json!({
                "error": "insufficient_credits",
                "message": format!("need {required} credits, have {available}"),
                "required": required,
                "available": available,
            })),
        )
            .into_response(),
        CoreError::Authentication(msg) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
        CoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        CoreError::LedgerConflict(msg) => {
            // The whole request is safe to retry.
            json_error(StatusCode::SERVICE_UNAVAILABLE, "conflict", msg)
        }
        CoreError::TransientProvider(msg) => {
            json_error(StatusCode::BAD_GATEWAY, "provider_error", msg)
        }
        CoreError::Timeout(msg) => json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
        CoreError::StorageInconsistency(msg) => {
            tracing::error!(error = %msg, "storage inconsistency surfaced to handler");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
        }
    }
}

/// Map a webhook failure onto the status the provider keys redelivery on.
pub fn webhook_error_to_response(err: WebhookError) -> axum::response::Response {
    match err {
        WebhookError::Rejected(msg) => json_error(StatusCode::BAD_REQUEST, "rejected", msg),
        WebhookError::Retryable(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "retry_later", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
