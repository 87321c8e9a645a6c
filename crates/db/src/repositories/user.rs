//! User repository.

use std::sync::Arc;

use crate::entities::{User, user};
use qna_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QuerySelect, sea_query::Expr,
};

/// User repository for database operations.
#[derive(Clone)]
pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a user by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<user::Model>> {
        Self::find_by_id_in(self.db.as_ref(), id).await
    }

    /// Find a user by ID on the given connection or transaction.
    pub async fn find_by_id_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<user::Model>> {
        User::find_by_id(id)
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a user by ID and lock the row until the transaction ends.
    pub async fn find_for_update_in<C: ConnectionTrait>(
        conn: &C,
        id: &str,
    ) -> AppResult<Option<user::Model>> {
        User::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a user by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<user::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(id.to_string()))
    }

    /// Find a user by username (case-insensitive).
    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<user::Model>> {
        User::find()
            .filter(user::Column::UsernameLower.eq(username.to_lowercase()))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Find a user by token.
    pub async fn find_by_token(&self, token: &str) -> AppResult<Option<user::Model>> {
        User::find()
            .filter(user::Column::Token.eq(token))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Create a new user.
    pub async fn create(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Update a user.
    pub async fn update(&self, model: user::ActiveModel) -> AppResult<user::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Add `delta` to a user's reputation (single UPDATE, no fetch).
    ///
    /// Returns the number of rows touched; `0` means the user does not exist.
    pub async fn adjust_reputation_in<C: ConnectionTrait>(
        conn: &C,
        user_id: &str,
        delta: i64,
    ) -> AppResult<u64> {
        let result = User::update_many()
            .col_expr(
                user::Column::Reputation,
                Expr::col(user::Column::Reputation).add(delta),
            )
            .filter(user::Column::Id.eq(user_id))
            .exec(conn)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
