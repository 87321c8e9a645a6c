//! Tag repository.

use std::sync::Arc;

use crate::entities::{Tag, tag};
use chrono::Utc;
use qna_common::{AppError, AppResult, IdGenerator};
use sea_orm::{
    DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, OnConflict},
};

/// Tag repository for database operations.
#[derive(Clone)]
pub struct TagRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl TagRepository {
    /// Create a new tag repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Count one more question for a tag, creating the tag on first use.
    ///
    /// A single `INSERT .. ON CONFLICT (name) DO UPDATE`, so concurrent
    /// questions with the same new tag both count.
    pub async fn increment_questions_count(&self, name: &str) -> AppResult<()> {
        let now = Utc::now();
        let model = tag::ActiveModel {
            id: Set(self.id_gen.generate()),
            name: Set(name.to_lowercase()),
            questions_count: Set(1),
            last_used_at: Set(Some(now.into())),
            created_at: Set(now.into()),
        };

        Tag::insert(model)
            .on_conflict(
                OnConflict::column(tag::Column::Name)
                    .value(
                        tag::Column::QuestionsCount,
                        Expr::col((tag::Entity, tag::Column::QuestionsCount)).add(1),
                    )
                    .value(tag::Column::LastUsedAt, Expr::current_timestamp())
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get popular tags (by question count).
    pub async fn find_popular(&self, limit: u64) -> AppResult<Vec<tag::Model>> {
        Tag::find()
            .order_by_desc(tag::Column::QuestionsCount)
            .order_by_asc(tag::Column::Name)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_tag(id: &str, name: &str, questions_count: i32) -> tag::Model {
        tag::Model {
            id: id.to_string(),
            name: name.to_string(),
            questions_count,
            last_used_at: Some(Utc::now().into()),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_increment_is_an_upsert() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = TagRepository::new(Arc::clone(&db));
        repo.increment_questions_count("Rust").await.unwrap();

        drop(repo);
        let db = Arc::into_inner(db).unwrap();
        let sql = format!("{:?}", db.into_transaction_log());
        assert!(sql.contains("ON CONFLICT"));
        assert!(sql.contains("DO UPDATE"));
        assert!(sql.contains(r#""rust""#));
    }

    #[tokio::test]
    async fn test_find_popular() {
        let rust = create_test_tag("t1", "rust", 12);
        let sql = create_test_tag("t2", "sql", 3);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[rust, sql]])
                .into_connection(),
        );

        let repo = TagRepository::new(db);
        let tags = repo.find_popular(10).await.unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "rust");
    }
}
