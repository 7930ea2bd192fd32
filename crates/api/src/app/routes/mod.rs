use axum::Router;

pub mod credits;
pub mod generations;
pub mod orders;
pub mod system;
pub mod webhooks;

/// Router for all principal-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/api/generations", generations::router())
        .nest("/api/projects", generations::project_router())
        .nest("/api/credits", credits::router())
        .nest("/api/orders", orders::router())
}
