use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use pose_bus::bus::PipelineStatus;

use crate::{
    app::AppState,
    handler::{ApiJsonResult, ApiResult},
};

pub fn pipeline_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/log/reset", post(reset_log))
        .route("/log/export", post(export_log))
        .route("/overlay.jpg", get(overlay))
}

async fn status(State(state): State<AppState>) -> ApiJsonResult<PipelineStatus> {
    Ok(Json(state.bus.status().await?))
}

async fn reset_log(State(state): State<AppState>) -> ApiJsonResult<String> {
    state.bus.reset_log().await?;
    Ok(Json("success".to_string()))
}

async fn export_log(State(state): State<AppState>) -> ApiJsonResult<String> {
    Ok(Json(state.bus.export_log().await?))
}

/// Latest overlay, transparent pixels flattened to black.
async fn overlay(State(state): State<AppState>) -> ApiResult<Response> {
    let image = state.overlay.borrow().clone();
    let Some(image) = image else {
        return Ok((StatusCode::NOT_FOUND, "no frame processed yet").into_response());
    };
    let jpeg = image.to_jpeg(state.jpeg_quality)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], Bytes::from(jpeg)).into_response())
}
