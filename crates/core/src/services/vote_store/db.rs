//! `PostgreSQL` vote store.
//!
//! Each unit is one database transaction. The target row is selected
//! `FOR UPDATE`, so units on the same target serialize across processes.

use std::sync::Arc;

use async_trait::async_trait;
use qna_common::{AppError, AppResult};
use qna_db::{
    entities::{TargetKind, VoteValue, user, vote},
    repositories::{AnswerRepository, QuestionRepository, UserRepository, VoteRepository},
};
use sea_orm::{DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};

use super::{VoteStore, VoteTarget, VoteUnit};

/// Vote store backed by the sea-orm connection pool.
#[derive(Clone)]
pub struct DbVoteStore {
    db: Arc<DatabaseConnection>,
}

impl DbVoteStore {
    /// Create a new database vote store.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VoteStore for DbVoteStore {
    async fn begin(&self) -> AppResult<Box<dyn VoteUnit>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(Box::new(DbVoteUnit { txn }))
    }

    async fn target_ids(
        &self,
        kind: TargetKind,
        after_id: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        match kind {
            TargetKind::Question => {
                QuestionRepository::find_ids_after_in(self.db.as_ref(), after_id, limit).await
            }
            TargetKind::Answer => {
                AnswerRepository::find_ids_after_in(self.db.as_ref(), after_id, limit).await
            }
        }
    }
}

struct DbVoteUnit {
    txn: DatabaseTransaction,
}

#[async_trait]
impl VoteUnit for DbVoteUnit {
    fn is_atomic(&self) -> bool {
        true
    }

    async fn load_target(&mut self, id: &str, kind: TargetKind) -> AppResult<Option<VoteTarget>> {
        let target = match kind {
            TargetKind::Question => QuestionRepository::find_for_update_in(&self.txn, id)
                .await?
                .map(VoteTarget::from),
            TargetKind::Answer => AnswerRepository::find_for_update_in(&self.txn, id)
                .await?
                .map(VoteTarget::from),
        };
        Ok(target)
    }

    async fn find_vote(
        &mut self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Option<vote::Model>> {
        VoteRepository::find_by_user_and_target_in(&self.txn, user_id, target_id, kind).await
    }

    async fn list_votes(
        &mut self,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Vec<vote::Model>> {
        VoteRepository::find_by_target_in(&self.txn, target_id, kind).await
    }

    async fn load_user(&mut self, id: &str) -> AppResult<Option<user::Model>> {
        UserRepository::find_by_id_in(&self.txn, id).await
    }

    async fn create_vote(&mut self, vote: vote::Model) -> AppResult<()> {
        let model = vote::ActiveModel {
            id: Set(vote.id),
            user_id: Set(vote.user_id),
            target_id: Set(vote.target_id),
            target_kind: Set(vote.target_kind),
            value: Set(vote.value),
            created_at: Set(vote.created_at),
            updated_at: Set(vote.updated_at),
        };
        VoteRepository::create_in(&self.txn, model).await
    }

    async fn update_vote(&mut self, id: &str, value: VoteValue) -> AppResult<()> {
        match VoteRepository::update_value_in(&self.txn, id, value).await? {
            0 => Err(AppError::ConcurrentModification(format!(
                "Vote {id} disappeared before update"
            ))),
            _ => Ok(()),
        }
    }

    async fn delete_vote(&mut self, id: &str) -> AppResult<()> {
        match VoteRepository::delete_in(&self.txn, id).await? {
            0 => Err(AppError::ConcurrentModification(format!(
                "Vote {id} disappeared before delete"
            ))),
            _ => Ok(()),
        }
    }

    async fn adjust_reputation(&mut self, user_id: &str, delta: i64) -> AppResult<()> {
        match UserRepository::adjust_reputation_in(&self.txn, user_id, delta).await? {
            0 => Err(AppError::AuthorNotFound(user_id.to_string())),
            _ => Ok(()),
        }
    }

    async fn save_target(&mut self, target: &VoteTarget) -> AppResult<()> {
        let saved = match target.kind {
            TargetKind::Question => {
                QuestionRepository::save_votes_in(
                    &self.txn,
                    &target.id,
                    &target.upvotes,
                    &target.downvotes,
                    target.version,
                )
                .await?
            }
            TargetKind::Answer => {
                AnswerRepository::save_votes_in(
                    &self.txn,
                    &target.id,
                    &target.upvotes,
                    &target.downvotes,
                    target.version,
                )
                .await?
            }
        };

        if saved {
            Ok(())
        } else {
            Err(AppError::ConcurrentModification(format!(
                "{} {} changed since version {}",
                target.kind, target.id, target.version
            )))
        }
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn
            .commit()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.txn
            .rollback()
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
    use serde_json::json;

    fn test_question(version: i32) -> qna_db::entities::question::Model {
        qna_db::entities::question::Model {
            id: "q1".to_string(),
            author_id: "author".to_string(),
            title: "Title".to_string(),
            content: "Body".to_string(),
            tags: json!([]),
            upvotes: json!(["u2"]),
            downvotes: json!([]),
            version,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn store(db: MockDatabase) -> DbVoteStore {
        DbVoteStore::new(Arc::new(db.into_connection()))
    }

    #[tokio::test]
    async fn test_load_target_locks_row_inside_transaction() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_question(4)]])
                .into_connection(),
        );
        let store = DbVoteStore::new(db.clone());

        let mut unit = store.begin().await.unwrap();
        assert!(unit.is_atomic());
        let target = unit
            .load_target("q1", TargetKind::Question)
            .await
            .unwrap()
            .unwrap();
        unit.commit().await.unwrap();

        assert_eq!(target.version, 4);
        assert_eq!(target.upvotes, vec!["u2".to_string()]);

        drop(store);
        let log = Arc::try_unwrap(db)
            .map_err(|_| "connection still shared")
            .unwrap()
            .into_transaction_log();
        assert!(format!("{log:?}").contains("FOR UPDATE"));
    }

    #[tokio::test]
    async fn test_adjust_reputation_missing_author() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(0)]));

        let mut unit = store.begin().await.unwrap();
        let result = unit.adjust_reputation("ghost", 5).await;
        unit.rollback().await.unwrap();

        assert!(matches!(result, Err(AppError::AuthorNotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_save_target_stale_version() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(0)]));

        let mut unit = store.begin().await.unwrap();
        let mut target = VoteTarget::new("a1", TargetKind::Answer, "author");
        target.version = 2;
        let result = unit.save_target(&target).await;
        unit.rollback().await.unwrap();

        assert!(matches!(result, Err(AppError::ConcurrentModification(_))));
    }

    #[tokio::test]
    async fn test_write_sequence() {
        let store = store(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1), exec(1), exec(1)]),
        );

        let mut unit = store.begin().await.unwrap();
        unit.create_vote(vote::Model {
            id: "v1".to_string(),
            user_id: "u1".to_string(),
            target_id: "q1".to_string(),
            target_kind: TargetKind::Question,
            value: VoteValue::Up.as_i16(),
            created_at: Utc::now().into(),
            updated_at: None,
        })
        .await
        .unwrap();
        unit.adjust_reputation("author", 5).await.unwrap();
        let mut target = VoteTarget::new("q1", TargetKind::Question, "author");
        target.set_membership("u1", Some(VoteValue::Up));
        unit.save_target(&target).await.unwrap();
        unit.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_of_vanished_vote_conflicts() {
        let store = store(MockDatabase::new(DatabaseBackend::Postgres).append_exec_results([exec(0)]));

        let mut unit = store.begin().await.unwrap();
        let result = unit.update_vote("v1", VoteValue::Down).await;
        unit.rollback().await.unwrap();

        assert!(matches!(result, Err(AppError::ConcurrentModification(_))));
    }
}
