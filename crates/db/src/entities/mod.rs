//! Database entities.

#![allow(missing_docs)]

pub mod answer;
pub mod comment;
pub mod question;
pub mod tag;
pub mod user;
pub mod vote;

pub use answer::Entity as Answer;
pub use comment::Entity as Comment;
pub use question::Entity as Question;
pub use tag::Entity as Tag;
pub use user::Entity as User;
pub use vote::Entity as Vote;
pub use vote::{TargetKind, VoteValue};
