use axum::{Json, Router, extract::State, routing::post};
use pose_bus::error::PipelineResult;
use serde::Serialize;

use crate::{app::AppState, handler::ApiJsonResult};

pub fn recording_router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_recording))
        .route("/stop", post(stop_recording))
}

/// Saved file name, or why the artifact was lost.
#[derive(Serialize)]
struct ArtifactOutcome {
    file: Option<String>,
    error: Option<String>,
}

impl From<&PipelineResult<String>> for ArtifactOutcome {
    fn from(result: &PipelineResult<String>) -> Self {
        match result {
            Ok(file) => Self {
                file: Some(file.clone()),
                error: None,
            },
            Err(e) => Self {
                file: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct StopResponse {
    frames: u64,
    media: ArtifactOutcome,
    log: ArtifactOutcome,
}

async fn start_recording(State(state): State<AppState>) -> ApiJsonResult<String> {
    state.bus.start_recording().await?;
    Ok(Json("recording".to_string()))
}

async fn stop_recording(State(state): State<AppState>) -> ApiJsonResult<StopResponse> {
    let report = state.bus.stop_recording().await?;
    Ok(Json(StopResponse {
        frames: report.frames,
        media: (&report.media).into(),
        log: (&report.log).into(),
    }))
}
