// src/handlers/mod.rs
//! Workflow control endpoints - start, status, cancel, model listing

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::GenerationJobConfig;
use crate::orchestrator::WorkflowOrchestrator;
use crate::AppState;

/// POST /api/workflows - validate the payload and start a new run
pub async fn create_workflow(
    Extension(state): Extension<Arc<AppState>>,
    Json(config): Json<GenerationJobConfig>,
) -> impl IntoResponse {
    let run = WorkflowOrchestrator::new(
        state.registry.clone(),
        state.queue.clone(),
        state.generation.clone(),
        state.execution_mode,
    );
    state.runs.insert(run.clone()).await;

    match run.start_workflow(config).await {
        Ok(()) => {
            let snapshot = run.state().await;
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "workflow_id": snapshot.id,
                    "phase": snapshot.phase,
                    "progress": snapshot.progress,
                })),
            )
                .into_response()
        }
        Err(
            e @ (EngineError::Validation(_)
            | EngineError::NoModelsRegistered
            | EngineError::InvalidModel(_)),
        ) => {
            // Nothing was submitted; drop the stillborn run.
            state.runs.remove(run.id()).await;
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to start workflow {}: {}", run.id(), e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": e.to_string(), "workflow_id": run.id()})),
            )
                .into_response()
        }
    }
}

/// GET /api/workflows/:workflow_id - current state snapshot
pub async fn get_workflow(
    Path(workflow_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    match state.runs.get(&workflow_id).await {
        Some(run) => (StatusCode::OK, Json(run.state().await)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("workflow not found: {workflow_id}")})),
        )
            .into_response(),
    }
}

/// POST /api/workflows/:workflow_id/cancel - cooperative cancellation.
/// Cancellation is not an error and is reported distinctly from failure.
pub async fn cancel_workflow(
    Path(workflow_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    match state.runs.get(&workflow_id).await {
        Some(run) => {
            run.cancel_workflow().await;
            (
                StatusCode::OK,
                Json(json!({"workflow_id": workflow_id, "status": "cancelled"})),
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("workflow not found: {workflow_id}")})),
        )
            .into_response(),
    }
}

/// GET /api/workflow-models - registered models in registration order
pub async fn list_workflow_models(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let models = state.registry.get_all().await;
    let summaries: Vec<_> = models
        .iter()
        .map(|model| {
            json!({
                "id": model.id,
                "name": model.name,
                "description": model.description,
                "version": model.version,
                "quality_levels": model.quality_levels,
                "content_types": model.content_types,
                "platforms": model.platforms,
                "phase_count": model.phases.len(),
            })
        })
        .collect();
    (
        StatusCode::OK,
        Json(json!({"default_model": state.registry.default_model_id(), "models": summaries})),
    )
        .into_response()
}

/// Routes for workflow management
pub fn workflow_routes() -> Router {
    Router::new()
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows/:workflow_id", get(get_workflow))
        .route("/api/workflows/:workflow_id/cancel", post(cancel_workflow))
        .route("/api/workflow-models", get(list_workflow_models))
}
