//! Error types for reel-wu

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Add targets a session id absent from the session store (400)
    #[error("Unknown session: {0}")]
    InvalidSessionReference(String),

    /// Remove would empty the unit (409); callers must delete instead
    #[error("Cannot remove the last session from work unit {0}; delete the unit instead")]
    LastMember(String),

    /// A recompute pass is already running (409)
    #[error("Recompute already in progress")]
    RecomputeInProgress,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// reel-common error
    #[error("Common error: {0}")]
    Common(#[from] reel_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Common(reel_common::Error::Database(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::InvalidSessionReference(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_SESSION_REFERENCE",
                msg,
            ),
            ApiError::LastMember(id) => (
                StatusCode::CONFLICT,
                "LAST_MEMBER",
                format!(
                    "Cannot remove the last session from work unit {}; delete the unit instead",
                    id
                ),
            ),
            ApiError::RecomputeInProgress => (
                StatusCode::CONFLICT,
                "RECOMPUTE_IN_PROGRESS",
                "Recompute already in progress".to_string(),
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            // Surface store-level NotFound as 404 rather than 500
            ApiError::Common(reel_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
