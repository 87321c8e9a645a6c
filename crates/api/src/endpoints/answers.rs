//! Answers endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::AppResult;
use qna_core::{CreateAnswerInput, VoteOutcome};
use qna_db::entities::{TargetKind, answer};
use serde::{Deserialize, Serialize};

use super::votes::cast_on;
use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::{ApiResponse, default_limit, max_limit},
};

/// Answer response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub id: String,
    pub created_at: String,
    pub question_id: String,
    pub author_id: String,
    pub content: String,
    pub is_accepted: bool,
    pub upvotes: usize,
    pub downvotes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_vote: Option<i16>,
}

impl From<answer::Model> for AnswerResponse {
    fn from(answer: answer::Model) -> Self {
        Self {
            id: answer.id,
            created_at: answer.created_at.to_rfc3339(),
            question_id: answer.question_id,
            author_id: answer.author_id,
            content: answer.content,
            is_accepted: answer.is_accepted,
            upvotes: answer.upvotes.as_array().map_or(0, Vec::len),
            downvotes: answer.downvotes.as_array().map_or(0, Vec::len),
            my_vote: None,
        }
    }
}

/// Answer a question.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateAnswerInput>,
) -> AppResult<ApiResponse<AnswerResponse>> {
    let answer = state.question_service.create_answer(&user.id, req).await?;
    Ok(ApiResponse::ok(answer.into()))
}

/// Show answer request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowAnswerRequest {
    pub answer_id: String,
}

/// Get an answer.
async fn show(
    MaybeAuthUser(user): MaybeAuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowAnswerRequest>,
) -> AppResult<ApiResponse<AnswerResponse>> {
    let answer = state.question_service.get_answer(&req.answer_id).await?;
    let mut response = AnswerResponse::from(answer);

    if let Some(user) = user {
        response.my_vote = state
            .vote_service
            .find_vote(&user.id, &req.answer_id, TargetKind::Answer)
            .await?
            .map(|v| v.value);
    }

    Ok(ApiResponse::ok(response))
}

/// List answers request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAnswersRequest {
    pub question_id: String,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub since_id: Option<String>,
}

/// Answers to a question, oldest first.
async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListAnswersRequest>,
) -> AppResult<ApiResponse<Vec<AnswerResponse>>> {
    let limit = req.limit.min(max_limit());
    let answers = state
        .question_service
        .list_answers(&req.question_id, limit, req.since_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(answers.into_iter().map(Into::into).collect()))
}

/// Vote on answer request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAnswerRequest {
    pub answer_id: String,
    pub value: serde_json::Value,
}

/// Vote on an answer.
async fn vote(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VoteAnswerRequest>,
) -> AppResult<ApiResponse<VoteOutcome>> {
    let outcome = cast_on(
        &state,
        &user.id,
        &req.answer_id,
        TargetKind::Answer,
        &req.value,
    )
    .await?;
    Ok(ApiResponse::ok(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/show", post(show))
        .route("/list", post(list))
        .route("/vote", post(vote))
}
