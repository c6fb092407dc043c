use crate::config::types::ReplboxError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Every variant renders as `{"detail": <message>}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Rejected before execution, or a bad file name
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Failure on our side; the message is passed through as-is
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ReplboxError> for AppError {
    fn from(err: ReplboxError) -> Self {
        match err {
            ReplboxError::RejectedPattern(_)
            | ReplboxError::UnsupportedLanguage(_)
            | ReplboxError::InvalidName(_) => AppError::BadRequest(err.to_string()),
            ReplboxError::NotFound(_) => AppError::NotFound("File not found".to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("worker task failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(msg) => {
                log::error!("Request failed: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, axum::Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
