use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use pose_bus::{
    error::PipelineError, model::ModelState, registry::ModelRegistry, types::Color,
};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, handler::ApiJsonResult};

pub fn model_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_models))
        .route("/active", post(set_active_models))
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    name: String,
    color: Color,
    /// Absent when the model is not selected.
    state: Option<ModelState>,
}

#[derive(Deserialize)]
struct SelectionRequest {
    ids: Vec<String>,
}

#[derive(Serialize)]
struct SelectionResponse {
    unchanged: bool,
    active: Vec<String>,
    loaded: Vec<String>,
    disposed: Vec<String>,
    failed: Vec<String>,
    unknown: Vec<String>,
}

async fn list_models(State(state): State<AppState>) -> ApiJsonResult<Vec<ModelEntry>> {
    let status = state.bus.status().await?;
    let models = state
        .registry
        .descriptors()
        .map(|d| ModelEntry {
            id: d.id.clone(),
            name: d.display_name.clone(),
            color: d.overlay_color,
            state: status
                .models
                .iter()
                .find(|m| m.id == d.id)
                .map(|m| m.state),
        })
        .collect();
    Ok(Json(models))
}

/// Rejects the whole request when any id is missing from the registry.
fn check_known(registry: &ModelRegistry, ids: &[String]) -> Result<(), PipelineError> {
    match ids.iter().find(|id| !registry.contains(id)) {
        Some(id) => Err(PipelineError::UnknownModel(id.clone())),
        None => Ok(()),
    }
}

async fn set_active_models(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> ApiJsonResult<SelectionResponse> {
    check_known(&state.registry, &request.ids)?;
    let report = state.bus.set_active_models(request.ids).await?;
    Ok(Json(SelectionResponse {
        unchanged: report.unchanged,
        active: report.active.clone(),
        loaded: report.loaded.clone(),
        disposed: report.disposed.clone(),
        failed: report.failed.iter().map(|e| e.to_string()).collect(),
        unknown: report.unknown.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use pose_bus::{
        model::{NoopModel, PoseModel},
        types::ModelDescriptor,
    };

    use super::*;
    use crate::handler::ApiError;

    #[test]
    fn test_unknown_ids_are_a_bad_request() {
        let registry = ModelRegistry::builder()
            .register(
                ModelDescriptor::new("none", "None", Color::rgb(255, 255, 255)),
                || Box::new(NoopModel) as Box<dyn PoseModel>,
            )
            .build();

        assert!(check_known(&registry, &["none".to_string()]).is_ok());
        let err = check_known(&registry, &["none".to_string(), "ghost".to_string()]).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownModel(ref id) if id == "ghost"));
        assert_eq!(ApiError::from(err).status(), StatusCode::BAD_REQUEST);
    }
}
