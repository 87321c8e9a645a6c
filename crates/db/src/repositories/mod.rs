//! Database repositories.
//!
//! Instance methods run on the shared connection pool. The `*_in` associated
//! functions take any [`sea_orm::ConnectionTrait`], so the same queries run
//! inside a [`sea_orm::DatabaseTransaction`].

pub mod answer;
pub mod comment;
pub mod question;
pub mod tag;
pub mod user;
pub mod vote;

pub use answer::AnswerRepository;
pub use comment::CommentRepository;
pub use question::{QuestionFilter, QuestionRepository};
pub use tag::TagRepository;
pub use user::UserRepository;
pub use vote::VoteRepository;
