//! Vote repository.

use crate::entities::{TargetKind, Vote, VoteValue, vote};
use chrono::Utc;
use qna_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, SqlErr, prelude::DateTimeWithTimeZone, sea_query::Expr,
};

/// Vote record queries.
///
/// Votes are only touched inside a vote transaction, so every operation runs on
/// a caller-supplied connection or transaction.
pub struct VoteRepository;

impl VoteRepository {
    /// Find a user's vote on a target on the given connection or transaction.
    pub async fn find_by_user_and_target_in<C: ConnectionTrait>(
        conn: &C,
        user_id: &str,
        target_id: &str,
        target_kind: TargetKind,
    ) -> AppResult<Option<vote::Model>> {
        Vote::find()
            .filter(vote::Column::UserId.eq(user_id))
            .filter(vote::Column::TargetId.eq(target_id))
            .filter(vote::Column::TargetKind.eq(target_kind))
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// All current votes on a target, oldest first.
    pub async fn find_by_target_in<C: ConnectionTrait>(
        conn: &C,
        target_id: &str,
        target_kind: TargetKind,
    ) -> AppResult<Vec<vote::Model>> {
        Vote::find()
            .filter(vote::Column::TargetId.eq(target_id))
            .filter(vote::Column::TargetKind.eq(target_kind))
            .order_by_asc(vote::Column::Id)
            .all(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Insert a vote record.
    ///
    /// A second record for the same (user, target, kind) violates the unique
    /// index and surfaces as [`AppError::ConcurrentModification`].
    pub async fn create_in<C: ConnectionTrait>(conn: &C, model: vote::ActiveModel) -> AppResult<()> {
        Vote::insert(model)
            .exec_without_returning(conn)
            .await
            .map_err(map_insert_error)?;
        Ok(())
    }

    /// Change the value of an existing vote record.
    pub async fn update_value_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
        value: VoteValue,
    ) -> AppResult<u64> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Vote::update_many()
            .col_expr(vote::Column::Value, Expr::value(value.as_i16()))
            .col_expr(vote::Column::UpdatedAt, Expr::value(now))
            .filter(vote::Column::Id.eq(id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Delete a vote record.
    pub async fn delete_in<C: ConnectionTrait>(conn: &C, id: &str) -> AppResult<u64> {
        let result = Vote::delete_by_id(id)
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected)
    }
}

fn map_insert_error(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            AppError::ConcurrentModification(format!("Duplicate vote record: {detail}"))
        }
        _ => AppError::Storage(err.to_string()),
    }
}
