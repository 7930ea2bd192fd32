//! Provider callbacks. Authenticated by HMAC signature over the raw body,
//! never by bearer.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use polyform_providers::WebhookError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Header carrying the hex HMAC signature on webhook deliveries.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub fn router() -> Router {
    Router::new()
        .route("/webhooks/generation", post(generation_webhook))
        .route("/webhooks/payment", post(payment_webhook))
}

pub async fn generation_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = match signature_header(&headers) {
        Ok(signature) => signature,
        Err(response) => return response,
    };

    let secret = services.config.generation_webhook_secret.clone();
    match services
        .reconciler
        .handle_webhook(&body, &signature, &secret)
        .await
    {
        Ok(generation) => {
            (StatusCode::OK, Json(dto::generation_to_json(&generation))).into_response()
        }
        Err(e) => errors::webhook_error_to_response(e),
    }
}

pub async fn payment_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = match signature_header(&headers) {
        Ok(signature) => signature,
        Err(response) => return response,
    };

    let secret = services.config.payment_webhook_secret.clone();
    match services
        .billing
        .handle_webhook(&body, &signature, &secret)
        .await
    {
        Ok(order) => (StatusCode::OK, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::webhook_error_to_response(e),
    }
}

fn signature_header(headers: &HeaderMap) -> Result<String, axum::response::Response> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            errors::webhook_error_to_response(WebhookError::Rejected(
                "missing signature header".to_string(),
            ))
        })
}
