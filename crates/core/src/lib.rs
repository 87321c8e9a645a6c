//! Core business logic for qna-rs.

pub mod services;

pub use services::*;
