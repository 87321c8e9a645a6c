//! Comment service.

use chrono::Utc;
use qna_common::{AppError, AppResult, IdGenerator};
use qna_db::{
    entities::{TargetKind, comment},
    repositories::{AnswerRepository, CommentRepository, QuestionRepository},
};
use sea_orm::Set;
use serde::Deserialize;
use validator::Validate;

use super::vote::parse_target_kind;

/// Comments on questions and answers.
#[derive(Clone)]
pub struct CommentService {
    comment_repo: CommentRepository,
    question_repo: QuestionRepository,
    answer_repo: AnswerRepository,
    id_gen: IdGenerator,
}

/// Input for commenting on a question or answer.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentInput {
    #[validate(length(min = 1, max = 64))]
    pub target_id: String,

    pub target_kind: String,

    #[validate(length(min = 1, max = 3000))]
    pub content: String,
}

impl CommentService {
    /// Create a new comment service.
    #[must_use]
    pub const fn new(
        comment_repo: CommentRepository,
        question_repo: QuestionRepository,
        answer_repo: AnswerRepository,
    ) -> Self {
        Self {
            comment_repo,
            question_repo,
            answer_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Comment on an existing question or answer.
    pub async fn create_comment(
        &self,
        author_id: &str,
        input: CreateCommentInput,
    ) -> AppResult<comment::Model> {
        let kind = parse_target_kind(&input.target_kind)?;
        input.validate()?;

        self.ensure_target(kind, &input.target_id).await?;

        let model = comment::ActiveModel {
            id: Set(self.id_gen.generate()),
            author_id: Set(author_id.to_string()),
            target_id: Set(input.target_id),
            target_kind: Set(kind),
            content: Set(input.content),
            created_at: Set(Utc::now().into()),
        };

        self.comment_repo.create(model).await
    }

    /// Comments on a target, oldest first.
    pub async fn list_comments(
        &self,
        target_id: &str,
        target_kind: &str,
        limit: u64,
        since_id: Option<&str>,
    ) -> AppResult<Vec<comment::Model>> {
        let kind = parse_target_kind(target_kind)?;
        self.comment_repo
            .find_by_target(target_id, kind, limit, since_id)
            .await
    }

    async fn ensure_target(&self, kind: TargetKind, target_id: &str) -> AppResult<()> {
        let exists = match kind {
            TargetKind::Question => self.question_repo.find_by_id(target_id).await?.is_some(),
            TargetKind::Answer => self.answer_repo.find_by_id(target_id).await?.is_some(),
        };

        if exists {
            Ok(())
        } else {
            Err(AppError::TargetNotFound(format!("{kind} {target_id}")))
        }
    }
}
