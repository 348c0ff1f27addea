use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use backup_engine::{EngineError, ErrorKind};
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    /// Integrity failures keep their (sanitized) message; operators need it.
    #[error("{0}")]
    Integrity(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e.kind() {
            ErrorKind::Conflict => AppError::Conflict(e.public_message()),
            ErrorKind::NotFound => AppError::NotFound(e.public_message()),
            ErrorKind::InvalidArchive => AppError::Unprocessable(e.public_message()),
            ErrorKind::InvalidName => AppError::BadRequest(e.public_message()),
            ErrorKind::IntegrityFailure => AppError::Integrity(e.public_message()),
            ErrorKind::Internal => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::Integrity(m) => {
                tracing::error!("Integrity failure: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!(
                    "Internal error: {}",
                    backup_engine::utils::sanitize_message(&format!("{e:#}"))
                );
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
