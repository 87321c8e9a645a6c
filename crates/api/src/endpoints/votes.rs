//! Vote endpoints.

use axum::{Json, Router, extract::State, routing::post};
use qna_common::AppResult;
use qna_core::{CastVoteInput, VoteOutcome, parse_target_kind, parse_vote_value};
use qna_db::entities::TargetKind;
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Cast a vote on a loosely typed value for the given target.
pub(super) async fn cast_on(
    state: &AppState,
    user_id: &str,
    target_id: &str,
    kind: TargetKind,
    value: &serde_json::Value,
) -> AppResult<VoteOutcome> {
    let value = parse_vote_value(value)?;
    state
        .vote_service
        .cast_vote(user_id, target_id, kind, value)
        .await
}

/// Cast, flip, or retract a vote on any target.
async fn cast(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CastVoteInput>,
) -> AppResult<ApiResponse<VoteOutcome>> {
    let outcome = state.vote_service.cast(&user.id, req).await?;
    Ok(ApiResponse::ok(outcome))
}

/// Own vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVoteRequest {
    pub target_id: String,
    pub target_kind: String,
}

/// Own vote response. `value` is `null` when the user has not voted.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVoteResponse {
    pub target_id: String,
    pub target_kind: TargetKind,
    pub value: Option<i16>,
}

/// Get the caller's current vote on a target.
async fn mine(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<MyVoteRequest>,
) -> AppResult<ApiResponse<MyVoteResponse>> {
    let kind = parse_target_kind(&req.target_kind)?;
    let vote = state
        .vote_service
        .find_vote(&user.id, &req.target_id, kind)
        .await?;

    Ok(ApiResponse::ok(MyVoteResponse {
        target_id: req.target_id,
        target_kind: kind,
        value: vote.map(|v| v.value),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cast", post(cast))
        .route("/mine", post(mine))
}
