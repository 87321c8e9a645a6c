//! Comment repository.

use std::sync::Arc;

use crate::entities::{Comment, TargetKind, comment};
use qna_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

/// Comment repository for database operations.
#[derive(Clone)]
pub struct CommentRepository {
    db: Arc<DatabaseConnection>,
}

impl CommentRepository {
    /// Create a new comment repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new comment.
    pub async fn create(&self, model: comment::ActiveModel) -> AppResult<comment::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Get comments on a target (paginated, oldest first).
    pub async fn find_by_target(
        &self,
        target_id: &str,
        target_kind: TargetKind,
        limit: u64,
        since_id: Option<&str>,
    ) -> AppResult<Vec<comment::Model>> {
        let mut query = Comment::find()
            .filter(comment::Column::TargetId.eq(target_id))
            .filter(comment::Column::TargetKind.eq(target_kind))
            .order_by_asc(comment::Column::Id);

        if let Some(id) = since_id {
            query = query.filter(comment::Column::Id.gt(id));
        }

        query
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
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn create_test_comment(id: &str, target_id: &str) -> comment::Model {
        comment::Model {
            id: id.to_string(),
            author_id: "author".to_string(),
            target_id: target_id.to_string(),
            target_kind: TargetKind::Answer,
            content: "Could you add the compiler output?".to_string(),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_find_by_target_oldest_first() {
        let c1 = create_test_comment("c1", "a1");
        let c2 = create_test_comment("c2", "a1");

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[c1, c2]])
                .into_connection(),
        );

        let repo = CommentRepository::new(Arc::clone(&db));
        let comments = repo
            .find_by_target("a1", TargetKind::Answer, 10, Some("c0"))
            .await
            .unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, "c1");

        drop(repo);
        let db = Arc::into_inner(db).unwrap();
        let sql = format!("{:?}", db.into_transaction_log());
        assert!(sql.contains("target_kind"));
        assert!(sql.contains("ASC"));
    }
}
