//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Standard success envelope: `{"data": ...}`.
///
/// Failures are rendered by `AppError`'s own `IntoResponse` as
/// `{"error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response.
    pub const fn ok(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Default page size for list endpoints.
pub const fn default_limit() -> u64 {
    10
}

/// Largest page a list endpoint will return.
pub const fn max_limit() -> u64 {
    100
}
