//! Question repository.

use std::sync::Arc;

use crate::entities::{Question, question};
use qna_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
    sea_query::{Expr, extension::postgres::PgBinOper},
};
use serde_json::json;

/// Optional narrowing for question listings.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    /// Only questions carrying this (normalized) tag.
    pub tag: Option<String>,
    /// Only questions asked by this user.
    pub author_id: Option<String>,
}

/// Question repository for database operations.
#[derive(Clone)]
pub struct QuestionRepository {
    db: Arc<DatabaseConnection>,
}

impl QuestionRepository {
    /// Create a new question repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a question by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<question::Model>> {
        Self::find_by_id_in(self.db.as_ref(), id).await
    }

    /// Find a question by ID on the given connection or transaction.
    pub async fn find_by_id_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<question::Model>> {
        Question::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a question and lock its row until the transaction ends.
    pub async fn find_for_update_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<question::Model>> {
        Question::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a question by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<question::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Question {id}")))
    }

    /// Create a new question.
    pub async fn create(&self, model: question::ActiveModel) -> AppResult<question::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Get recent questions (paginated, newest first).
    pub async fn find_recent(
        &self,
        filter: &QuestionFilter,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<question::Model>> {
        let mut query = Question::find().order_by_desc(question::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(question::Column::Id.lt(id));
        }

        if let Some(author_id) = &filter.author_id {
            query = query.filter(question::Column::AuthorId.eq(author_id.as_str()));
        }

        // PostgreSQL: tags @> '["tag"]'::jsonb
        if let Some(tag) = &filter.tag {
            query = query.filter(
                Expr::col((Question, question::Column::Tags))
                    .binary(PgBinOper::Contains, Expr::val(json!([tag]))),
            );
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
        let result = Question::update_many()
            .col_expr(question::Column::Upvotes, Expr::value(json!(upvotes)))
            .col_expr(question::Column::Downvotes, Expr::value(json!(downvotes)))
            .col_expr(
                question::Column::Version,
                Expr::col(question::Column::Version).add(1),
            )
            .filter(question::Column::Id.eq(id))
            .filter(question::Column::Version.eq(expected_version))
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected == 1)
    }

    /// Question IDs in ascending order, starting after `after_id`.
    pub async fn find_ids_after_in<C: ConnectionTrait>(
        conn: &C,
        after_id: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let mut query = Question::find()
            .select_only()
            .column(question::Column::Id)
            .order_by_asc(question::Column::Id);

        if let Some(id) = after_id {
            query = query.filter(question::Column::Id.gt(id));
        }

        query
            .limit(limit)
            .into_tuple::<String>()
            .all(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_question(id: &str, author_id: &str) -> question::Model {
        question::Model {
            id: id.to_string(),
            author_id: author_id.to_string(),
            title: "How do lifetimes work?".to_string(),
            content: "Borrow checker question".to_string(),
            tags: json!(["rust"]),
            upvotes: json!(["u2"]),
            downvotes: json!([]),
            version: 3,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_by_id_found() {
        let question = create_test_question("q1", "author1");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[question.clone()]])
                .into_connection(),
        );

        let repo = QuestionRepository::new(db);
        let found = repo.find_by_id("q1").await.unwrap().unwrap();

        assert_eq!(found.author_id, "author1");
        assert_eq!(found.upvotes, json!(["u2"]));
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<question::Model>::new()])
                .into_connection(),
        );

        let repo = QuestionRepository::new(db);
        let result = repo.get_by_id("missing").await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_for_update_locks_row() {
        let question = create_test_question("q1", "author1");

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[question]])
            .into_connection();

        let found = QuestionRepository::find_for_update_in(&db, "q1")
            .await
            .unwrap();
        assert!(found.is_some());

        let log = db.into_transaction_log();
        let sql = format!("{log:?}");
        assert!(sql.contains("FOR UPDATE"));
    }

    #[tokio::test]
    async fn test_save_votes_version_mismatch() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                },
            ])
            .into_connection();

        let up = vec!["u1".to_string()];
        let saved = QuestionRepository::save_votes_in(&db, "q1", &up, &[], 3)
            .await
            .unwrap();
        assert!(saved);

        let stale = QuestionRepository::save_votes_in(&db, "q1", &up, &[], 3)
            .await
            .unwrap();
        assert!(!stale);
    }

    #[tokio::test]
    async fn test_find_recent() {
        let q1 = create_test_question("q2", "author1");
        let q2 = create_test_question("q1", "author2");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[q1, q2]])
                .into_connection(),
        );

        let repo = QuestionRepository::new(db);
        let result = repo
            .find_recent(&QuestionFilter::default(), 10, None)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, "q2");
    }

    #[tokio::test]
    async fn test_find_recent_by_tag_and_author() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_question("q1", "author1")]])
                .into_connection(),
        );

        let repo = QuestionRepository::new(Arc::clone(&db));
        let filter = QuestionFilter {
            tag: Some("rust".to_string()),
            author_id: Some("author1".to_string()),
        };
        let result = repo.find_recent(&filter, 10, None).await.unwrap();
        assert_eq!(result.len(), 1);

        drop(repo);
        let db = Arc::into_inner(db).unwrap();
        let sql = format!("{:?}", db.into_transaction_log());
        assert!(sql.contains("@>"));
        assert!(sql.contains("author_id"));
        assert!(sql.contains(r#""author1""#));
    }
}
