use std::sync::Arc;

use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(get_balance))
        .route("/transactions", get(list_transactions))
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.ledger.balance(principal.user_id()).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(serde_json::json!({ "balance": balance })),
        )
            .into_response(),
        Err(e) => errors::core_error_to_response(e),
    }
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.ledger.transactions(principal.user_id()) {
        Ok(transactions) => {
            let items: Vec<_> = transactions.iter().map(dto::transaction_to_json).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "items": items })),
            )
                .into_response()
        }
        Err(e) => errors::core_error_to_response(e),
    }
}
