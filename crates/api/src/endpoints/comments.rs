//! Comments endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::AppResult;
use qna_core::CreateCommentInput;
use qna_db::entities::{TargetKind, comment};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, default_limit, max_limit},
};

/// Comment response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: String,
    pub created_at: String,
    pub author_id: String,
    pub target_id: String,
    pub target_kind: TargetKind,
    pub content: String,
}

impl From<comment::Model> for CommentResponse {
    fn from(comment: comment::Model) -> Self {
        Self {
            id: comment.id,
            created_at: comment.created_at.to_rfc3339(),
            author_id: comment.author_id,
            target_id: comment.target_id,
            target_kind: comment.target_kind,
            content: comment.content,
        }
    }
}

/// Comment on a question or answer.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateCommentInput>,
) -> AppResult<ApiResponse<CommentResponse>> {
    let comment = state.comment_service.create_comment(&user.id, req).await?;
    Ok(ApiResponse::ok(comment.into()))
}

/// List comments request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCommentsRequest {
    pub target_id: String,
    pub target_kind: String,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub since_id: Option<String>,
}

/// Comments on a target, oldest first.
async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListCommentsRequest>,
) -> AppResult<ApiResponse<Vec<CommentResponse>>> {
    let comments = state
        .comment_service
        .list_comments(
            &req.target_id,
            &req.target_kind,
            req.limit.min(max_limit()),
            req.since_id.as_deref(),
        )
        .await?;

    Ok(ApiResponse::ok(comments.into_iter().map(Into::into).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/list", post(list))
}
