use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pose_bus::error::PipelineError;

pub mod model;
pub mod pipeline;
pub mod recording;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<PipelineError>() {
            Some(e) if e.is_misuse() => StatusCode::CONFLICT,
            Some(PipelineError::UnknownModel(_)) => StatusCode::BAD_REQUEST,
            Some(PipelineError::ShutDown | PipelineError::BusClosed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("ApiError: {:?}", self.0);
        } else {
            log::warn!("ApiError: {:#}", self.0);
        }
        (status, format!("{:#}", self.0)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
