//! Operation-boundary error taxonomy. Every handler reports validation and
//! permission failures here with no retry; datastore faults surface as
//! internal errors and are logged, never swallowed.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Actor/target mismatch, or access to a resource the actor cannot see.
    #[error("Forbidden")]
    Forbidden,

    /// Missing credential on a protected route.
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Duplicate conversation, already-member and similar clashes.
    #[error("{0}")]
    Conflict(String),

    /// Malformed input: empty text message, bad emoji, rejected sticker.
    #[error("{0}")]
    Validation(String),

    /// Role-gated admin actions attempted without the role.
    #[error("{0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Forbidden | AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(e) => {
                error!("internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            // Don't leak internals to clients.
            AppError::Internal(_) => "Server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
