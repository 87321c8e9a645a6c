//! Users endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::{AppError, AppResult};
use qna_db::entities::user;
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// User response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub created_at: String,
    pub username: String,
    pub reputation: i64,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at.to_rfc3339(),
            username: user.username,
            reputation: user.reputation,
        }
    }
}

/// Get current user.
async fn me(AuthUser(user): AuthUser) -> ApiResponse<UserResponse> {
    ApiResponse::ok(user.into())
}

/// Show user request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowUserRequest {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

/// Get a user by ID or username.
async fn show(
    State(state): State<AppState>,
    Json(req): Json<ShowUserRequest>,
) -> AppResult<ApiResponse<UserResponse>> {
    let user = if let Some(user_id) = req.user_id {
        state.user_service.get(&user_id).await?
    } else if let Some(username) = req.username {
        state.user_service.get_by_username(&username).await?
    } else {
        return Err(AppError::BadRequest(
            "userId or username is required".to_string(),
        ));
    };

    Ok(ApiResponse::ok(user.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", post(me))
        .route("/show", post(show))
}
