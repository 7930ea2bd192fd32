use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use polyform_core::{GenerationId, ProjectId};
use polyform_workflow::CreateGeneration;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_generation))
        .route("/:id", get(get_generation))
}

pub fn project_router() -> Router {
    Router::new()
        .route("/:id", get(get_project))
        .route("/:id/generations", get(list_project_generations))
}

/// Create a generation and run its workflow in the background. The response
/// returns the pending record; clients follow progress via reads.
pub async fn create_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateGenerationRequest>,
) -> axum::response::Response {
    let request = CreateGeneration {
        workflow_type: body.workflow_type,
        input_data: body.input_data,
        project_id: body.project_id.map(ProjectId::from_uuid),
    };

    let generation = match services.engine.create(principal.user_id(), request).await {
        Ok(generation) => generation,
        Err(e) => return errors::core_error_to_response(e),
    };

    let engine = services.engine.clone();
    let generation_id = generation.id;
    tokio::spawn(async move {
        if let Err(e) = engine.run(generation_id).await {
            tracing::error!(%generation_id, error = %e, "workflow run aborted");
        }
    });

    (
        StatusCode::CREATED,
        Json(dto::generation_to_json(&generation)),
    )
        .into_response()
}

/// Read a generation, reconciling a stale in-flight record against the
/// provider first.
pub async fn get_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<uuid::Uuid>,
) -> axum::response::Response {
    let generation_id = GenerationId::from_uuid(id);
    let generation = match services.reconciler.refresh_if_stale(generation_id).await {
        Ok(generation) => generation,
        Err(e) => return errors::core_error_to_response(e),
    };

    if generation.user_id != principal.user_id() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found");
    }

    (StatusCode::OK, Json(dto::generation_to_json(&generation))).into_response()
}

pub async fn get_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<uuid::Uuid>,
) -> axum::response::Response {
    match owned_project(&services, &principal, id) {
        Ok(project) => (StatusCode::OK, Json(dto::project_to_json(&project))).into_response(),
        Err(response) => response,
    }
}

pub async fn list_project_generations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<uuid::Uuid>,
) -> axum::response::Response {
    let project = match owned_project(&services, &principal, id) {
        Ok(project) => project,
        Err(response) => return response,
    };

    let generations = match services.jobs.list_generations(project.id) {
        Ok(generations) => generations,
        Err(e) => return errors::core_error_to_response(e.into()),
    };

    let items: Vec<_> = generations.iter().map(dto::generation_to_json).collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({ "items": items })),
    )
        .into_response()
}

fn owned_project(
    services: &AppServices,
    principal: &PrincipalContext,
    id: uuid::Uuid,
) -> Result<polyform_jobs::Project, axum::response::Response> {
    let project_id = ProjectId::from_uuid(id);
    match services.jobs.get_project(project_id) {
        Ok(Some(project)) if project.user_id == principal.user_id() => Ok(project),
        Ok(_) => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "not found",
        )),
        Err(e) => Err(errors::core_error_to_response(e.into())),
    }
}
