//! Authentication endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::AppResult;
use qna_core::CreateUserInput;
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Signup request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

/// Credentials issued by signup and signin.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Create a new user account.
async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<ApiResponse<SessionResponse>> {
    let user = state
        .user_service
        .create(CreateUserInput {
            username: req.username,
            password: req.password,
        })
        .await?;

    Ok(ApiResponse::ok(SessionResponse {
        id: user.id,
        username: user.username,
        token: user.token.unwrap_or_default(),
    }))
}

/// Signin request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninRequest {
    pub username: String,
    pub password: String,
}

/// Sign in to an existing account.
async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> AppResult<ApiResponse<SessionResponse>> {
    let user = state
        .user_service
        .authenticate(&req.username, &req.password)
        .await?;

    Ok(ApiResponse::ok(SessionResponse {
        id: user.id,
        username: user.username,
        token: user.token.unwrap_or_default(),
    }))
}

/// Regenerate token response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateTokenResponse {
    pub token: String,
}

/// Regenerate the authentication token, invalidating the current one.
async fn regenerate_token(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<RegenerateTokenResponse>> {
    let token = state.user_service.regenerate_token(&user.id).await?;

    Ok(ApiResponse::ok(RegenerateTokenResponse { token }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/regenerate-token", post(regenerate_token))
}
