//! Question and answer service.

use chrono::Utc;
use qna_common::{AppError, AppResult, IdGenerator};
use qna_db::{
    entities::{answer, question, tag},
    repositories::{AnswerRepository, QuestionFilter, QuestionRepository, TagRepository},
};
use sea_orm::Set;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

/// Question and answer service for business logic.
#[derive(Clone)]
pub struct QuestionService {
    question_repo: QuestionRepository,
    answer_repo: AnswerRepository,
    tag_repo: TagRepository,
    id_gen: IdGenerator,
}

/// Input for asking a question.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionInput {
    #[validate(length(min = 1, max = 256))]
    pub title: String,

    #[validate(length(min = 1, max = 30000))]
    pub content: String,

    #[serde(default)]
    #[validate(length(max = 5))]
    pub tags: Vec<String>,
}

/// Input for answering a question.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnswerInput {
    pub question_id: String,

    #[validate(length(min = 1, max = 30000))]
    pub content: String,
}

impl QuestionService {
    /// Create a new question service.
    #[must_use]
    pub const fn new(
        question_repo: QuestionRepository,
        answer_repo: AnswerRepository,
        tag_repo: TagRepository,
    ) -> Self {
        Self {
            question_repo,
            answer_repo,
            tag_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Ask a question. It starts with no votes.
    ///
    /// Each distinct tag's question count goes up by one.
    pub async fn create_question(
        &self,
        author_id: &str,
        input: CreateQuestionInput,
    ) -> AppResult<question::Model> {
        input.validate()?;

        let mut tags: Vec<String> = Vec::with_capacity(input.tags.len());
        for tag in input.tags.iter().map(|t| normalize_tag(t)) {
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let model = question::ActiveModel {
            id: Set(self.id_gen.generate()),
            author_id: Set(author_id.to_string()),
            title: Set(input.title),
            content: Set(input.content),
            tags: Set(json!(&tags)),
            upvotes: Set(json!([])),
            downvotes: Set(json!([])),
            version: Set(0),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };

        let question = self.question_repo.create(model).await?;

        for tag in &tags {
            self.tag_repo.increment_questions_count(tag).await?;
        }

        Ok(question)
    }

    /// Get a question by ID.
    pub async fn get_question(&self, id: &str) -> AppResult<question::Model> {
        self.question_repo.get_by_id(id).await
    }

    /// Recent questions, newest first, optionally narrowed by tag or author.
    pub async fn list_questions(
        &self,
        mut filter: QuestionFilter,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<question::Model>> {
        filter.tag = filter.tag.map(|t| normalize_tag(&t)).filter(|t| !t.is_empty());
        self.question_repo.find_recent(&filter, limit, until_id).await
    }

    /// Most used tags.
    pub async fn popular_tags(&self, limit: u64) -> AppResult<Vec<tag::Model>> {
        self.tag_repo.find_popular(limit).await
    }

    /// Answer an existing question. The answer starts with no votes.
    pub async fn create_answer(
        &self,
        author_id: &str,
        input: CreateAnswerInput,
    ) -> AppResult<answer::Model> {
        input.validate()?;

        if self
            .question_repo
            .find_by_id(&input.question_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!("Question {}", input.question_id)));
        }

        let model = answer::ActiveModel {
            id: Set(self.id_gen.generate()),
            question_id: Set(input.question_id),
            author_id: Set(author_id.to_string()),
            content: Set(input.content),
            is_accepted: Set(false),
            upvotes: Set(json!([])),
            downvotes: Set(json!([])),
            version: Set(0),
            created_at: Set(Utc::now().into()),
            updated_at: Set(None),
        };

        self.answer_repo.create(model).await
    }

    /// Get an answer by ID.
    pub async fn get_answer(&self, id: &str) -> AppResult<answer::Model> {
        self.answer_repo.get_by_id(id).await
    }

    /// Answers to a question, oldest first.
    pub async fn list_answers(
        &self,
        question_id: &str,
        limit: u64,
        since_id: Option<&str>,
    ) -> AppResult<Vec<answer::Model>> {
        self.answer_repo
            .find_by_question(question_id, limit, since_id)
            .await
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
