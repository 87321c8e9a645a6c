//! API middleware.

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use qna_core::{CommentService, QuestionService, UserService, VoteService};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Accounts and token authentication.
    pub user_service: UserService,
    /// Questions and answers.
    pub question_service: QuestionService,
    /// Comments on questions and answers.
    pub comment_service: CommentService,
    /// Vote transactions.
    pub vote_service: VoteService,
}

/// Authentication middleware.
///
/// Resolves `Authorization: Bearer <token>` to a user and stores it in the
/// request extensions. Requests without a valid token pass through
/// unauthenticated.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    if let Some(token) = token {
        match state.user_service.authenticate_by_token(&token).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(err) => tracing::debug!(error = %err, "Bearer token rejected"),
        }
    }

    next.run(req).await
}
