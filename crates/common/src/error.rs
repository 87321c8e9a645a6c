//! Error types for qna-rs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // === Vote transaction errors ===
    /// The requested vote value is not exactly +1 or -1.
    #[error("Invalid vote value: {0}")]
    InvalidVoteValue(String),

    /// The target kind is neither `Question` nor `Answer`.
    #[error("Invalid target kind: {0}")]
    InvalidTargetKind(String),

    /// No question or answer exists for the target id.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The target's recorded author does not resolve to a user.
    #[error("Author not found: {0}")]
    AuthorNotFound(String),

    /// A concurrent writer changed the target, or a duplicate vote record was rejected.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    // === Server Errors ===
    /// Underlying store failure.
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_)
            | Self::UserNotFound(_)
            | Self::TargetNotFound(_)
            | Self::AuthorNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_)
            | Self::Validation(_)
            | Self::InvalidVoteValue(_)
            | Self::InvalidTargetKind(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,

            // 5xx Server Errors
            Self::Storage(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidVoteValue(_) => "INVALID_VOTE_VALUE",
            Self::InvalidTargetKind(_) => "INVALID_TARGET_KIND",
            Self::TargetNotFound(_) => "TARGET_NOT_FOUND",
            Self::AuthorNotFound(_) => "AUTHOR_NOT_FOUND",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::Storage(_) => "STORAGE_FAILURE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
