//! HTTP error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fieldwatch::PipelineError;
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The camera id is not in the catalog.
    #[error("Camera {0} not found")]
    CameraNotFound(usize),

    /// A reopen was requested for a camera that is not stalled.
    #[error("Camera {camera_id} is {state}, not stalled")]
    NotStalled { camera_id: usize, state: &'static str },

    #[error("Pipeline error: {0}")]
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::SourceUnavailable(id) => ApiError::CameraNotFound(id),
            other => ApiError::Pipeline(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::CameraNotFound(_) => (StatusCode::NOT_FOUND, "CAMERA_NOT_FOUND"),
            ApiError::NotStalled { .. } => (StatusCode::CONFLICT, "NOT_STALLED"),
            ApiError::Pipeline(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PIPELINE_ERROR"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
