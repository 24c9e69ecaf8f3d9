use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chirp_store::StoreError;

/// Error taxonomy surfaced by the messaging core.
///
/// Validation and authorization failures are returned synchronously with
/// no retry. Transient failures on advisory steps (activity pointer,
/// notification rows, live emission) never appear here; they are logged
/// where they happen because the persisted message is the durable
/// contract.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Blob-store failure. Raised before any message row is written, so a
    /// failed upload can never leave an orphan message behind.
    #[error("Media upload failed: {0}")]
    MediaUploadFailed(String),

    #[error("Database error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound("record not found".to_string()),
            StoreError::InvalidConversationShape(msg) => Self::Validation(msg),
            StoreError::InvalidMessagePayload(msg) => Self::Validation(msg),
            StoreError::InvalidSettingsUpdate(msg) => Self::Validation(msg),
            StoreError::Unauthorized(msg) => Self::Forbidden(msg),
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::MediaUploadFailed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
