//! Questions endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::AppResult;
use qna_core::{CreateQuestionInput, VoteOutcome};
use qna_db::{
    entities::{TargetKind, question, tag},
    repositories::QuestionFilter,
};
use serde::{Deserialize, Serialize};

use super::votes::cast_on;
use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::{ApiResponse, default_limit, max_limit},
};

/// Question response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub id: String,
    pub created_at: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub tags: serde_json::Value,
    pub upvotes: usize,
    pub downvotes: usize,
    /// The caller's vote, when authenticated and voted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_vote: Option<i16>,
}

impl From<question::Model> for QuestionResponse {
    fn from(question: question::Model) -> Self {
        Self {
            id: question.id,
            created_at: question.created_at.to_rfc3339(),
            author_id: question.author_id,
            title: question.title,
            content: question.content,
            tags: question.tags,
            upvotes: question.upvotes.as_array().map_or(0, Vec::len),
            downvotes: question.downvotes.as_array().map_or(0, Vec::len),
            my_vote: None,
        }
    }
}

/// Ask a question.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateQuestionInput>,
) -> AppResult<ApiResponse<QuestionResponse>> {
    let question = state.question_service.create_question(&user.id, req).await?;
    Ok(ApiResponse::ok(question.into()))
}

/// Show question request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowQuestionRequest {
    pub question_id: String,
}

/// Get a question.
async fn show(
    MaybeAuthUser(user): MaybeAuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowQuestionRequest>,
) -> AppResult<ApiResponse<QuestionResponse>> {
    let question = state.question_service.get_question(&req.question_id).await?;
    let mut response = QuestionResponse::from(question);

    if let Some(user) = user {
        response.my_vote = state
            .vote_service
            .find_vote(&user.id, &req.question_id, TargetKind::Question)
            .await?
            .map(|v| v.value);
    }

    Ok(ApiResponse::ok(response))
}

/// List questions request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuestionsRequest {
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub until_id: Option<String>,
    /// Only questions carrying this tag.
    pub tag: Option<String>,
    /// Only questions asked by this user.
    pub author_id: Option<String>,
}

/// Recent questions, newest first.
async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListQuestionsRequest>,
) -> AppResult<ApiResponse<Vec<QuestionResponse>>> {
    let limit = req.limit.min(max_limit());
    let filter = QuestionFilter {
        tag: req.tag,
        author_id: req.author_id,
    };
    let questions = state
        .question_service
        .list_questions(filter, limit, req.until_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(
        questions.into_iter().map(Into::into).collect(),
    ))
}

/// Vote on question request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteQuestionRequest {
    pub question_id: String,
    pub value: serde_json::Value,
}

/// Vote on a question.
async fn vote(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VoteQuestionRequest>,
) -> AppResult<ApiResponse<VoteOutcome>> {
    let outcome = cast_on(
        &state,
        &user.id,
        &req.question_id,
        TargetKind::Question,
        &req.value,
    )
    .await?;
    Ok(ApiResponse::ok(outcome))
}

/// Tag response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResponse {
    pub name: String,
    pub questions_count: i32,
}

impl From<tag::Model> for TagResponse {
    fn from(tag: tag::Model) -> Self {
        Self {
            name: tag.name,
            questions_count: tag.questions_count,
        }
    }
}

/// Popular tags request.
#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

/// Most used tags.
async fn tags(
    State(state): State<AppState>,
    Json(req): Json<TagsRequest>,
) -> AppResult<ApiResponse<Vec<TagResponse>>> {
    let tags = state
        .question_service
        .popular_tags(req.limit.min(max_limit()))
        .await?;
    Ok(ApiResponse::ok(tags.into_iter().map(Into::into).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/show", post(show))
        .route("/list", post(list))
        .route("/vote", post(vote))
        .route("/tags", post(tags))
}
