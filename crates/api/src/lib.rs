//! HTTP API layer for qna-rs.
//!
//! RPC-style API: every endpoint is a `POST` taking a JSON body, with
//! bearer-token authentication resolved by [`middleware::auth_middleware`].
//!
//! - **Endpoints**: accounts, users, questions, answers, votes
//! - **Extractors**: authenticated user
//! - **Middleware**: application state and authentication
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
pub use middleware::{AppState, auth_middleware};
