//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: store/provider/service construction
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(config: ApiConfig) -> Router {
    build_app_with(Arc::new(services::build_services(config)))
}

/// Build the router over pre-built services. Tests use this to keep handles
/// on the mock providers.
pub fn build_app_with(services: Arc<AppServices>) -> Router {
    // Domain routes: require a bearer principal.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn(middleware::principal_middleware));

    // Webhooks and health authenticate by signature (or not at all), never
    // by bearer.
    let public = routes::webhooks::router().layer(Extension(services));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
