use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use polyform_core::OrderId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id/verify", post(verify_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    match services
        .billing
        .create_order(principal.user_id(), body.amount, &body.currency, body.credits)
        .await
    {
        Ok(order) => (StatusCode::CREATED, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.billing.orders_for_user(principal.user_id()) {
        Ok(orders) => {
            let items: Vec<_> = orders.iter().map(dto::order_to_json).collect();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::core_error_to_response(e),
    }
}

/// Client-relayed completion: the checkout flow hands the client a capture
/// signature, which it submits here instead of waiting for the webhook.
pub async fn verify_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<uuid::Uuid>,
    Json(body): Json<dto::VerifyOrderRequest>,
) -> axum::response::Response {
    let secret = services.config.payment_webhook_secret.clone();
    match services
        .billing
        .verify_payment(
            principal.user_id(),
            OrderId::from_uuid(id),
            &body.payment_id,
            &body.signature,
            &secret,
        )
        .await
    {
        Ok(order) => (StatusCode::OK, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}
