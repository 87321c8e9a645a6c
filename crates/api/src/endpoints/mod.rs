//! API endpoints.

mod answers;
mod auth;
mod comments;
mod questions;
mod users;
mod votes;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .nest("/users", users::router())
        .nest("/questions", questions::router())
        .nest("/answers", answers::router())
        .nest("/comments", comments::router())
        .nest("/votes", votes::router())
}
