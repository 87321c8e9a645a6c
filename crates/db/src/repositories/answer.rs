//! Answer repository.

use std::sync::Arc;

use crate::entities::{Answer, answer};
use qna_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, sea_query::Expr,
};
use serde_json::json;

/// Answer repository for database operations.
#[derive(Clone)]
pub struct AnswerRepository {
    db: Arc<DatabaseConnection>,
}

impl AnswerRepository {
    /// Create a new answer repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an answer by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<answer::Model>> {
        Self::find_by_id_in(self.db.as_ref(), id).await
    }

    /// Find an answer by ID on the given connection or transaction.
    pub async fn find_by_id_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<answer::Model>> {
        Answer::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find an answer and lock its row until the transaction ends.
    pub async fn find_for_update_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<answer::Model>> {
        Answer::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find an answer by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<answer::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Answer {id}")))
    }

    /// Create a new answer.
    pub async fn create(&self, model: answer::ActiveModel) -> AppResult<answer::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Get answers to a question (paginated, oldest first).
    pub async fn find_by_question(
        &self,
        question_id: &str,
        limit: u64,
        since_id: Option<&str>,
    ) -> AppResult<Vec<answer::Model>> {
        let mut query = Answer::find()
            .filter(answer::Column::QuestionId.eq(question_id))
            .order_by_asc(answer::Column::Id);

        if let Some(id) = since_id {
            query = query.filter(answer::Column::Id.gt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Overwrite the vote membership sets if the stored version still matches.
    ///
    /// Bumps the version. Returns `false` when another writer got there first.
    pub async fn save_votes_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
        upvotes: &[String],
        downvotes: &[String],
        expected_version: i32,
    ) -> AppResult<bool> {
        let result = Answer::update_many()
            .col_expr(answer::Column::Upvotes, Expr::value(json!(upvotes)))
            .col_expr(answer::Column::Downvotes, Expr::value(json!(downvotes)))
            .col_expr(
                answer::Column::Version,
                Expr::col(answer::Column::Version).add(1),
            )
            .filter(answer::Column::Id.eq(id))
            .filter(answer::Column::Version.eq(expected_version))
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected == 1)
    }

    /// Answer IDs in ascending order, starting after `after_id`.
    pub async fn find_ids_after_in<C: ConnectionTrait>(
        conn: &C,
        after_id: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let mut query = Answer::find()
            .select_only()
            .column(answer::Column::Id)
            .order_by_asc(answer::Column::Id);

        if let Some(id) = after_id {
            query = query.filter(answer::Column::Id.gt(id));
        }

        query
            .limit(limit)
            .into_tuple::<String>()
            .all(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}
