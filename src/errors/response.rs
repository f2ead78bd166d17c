use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;
use crate::errors::AppError;

// The IntoResponse trait implementation converts AppError into a well-formed HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            // Upload validation errors are bad requests and name the offending input
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Upload error: {}", msg)
            ).into_response(),

            // Status polling expects JSON, so missing resources answer in JSON too
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": msg }))
            ).into_response(),

            AppError::File(e) => {
                tracing::error!("File error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("File error: {}", e)
                ).into_response()
            }

            AppError::Task(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Task error: {}", msg)
            ).into_response(),

            AppError::Queue(msg) => {
                tracing::error!("Queue error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("Queue error: {}", msg)
                ).into_response()
            }
        }
    }
}
