//! User service.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use qna_common::{AppError, AppResult, IdGenerator};
use qna_db::{entities::user, repositories::UserRepository};
use sea_orm::Set;
use serde::Deserialize;
use validator::Validate;

/// User service for business logic.
#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    id_gen: IdGenerator,
}

/// Input for creating a new user.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(length(min = 1, max = 128))]
    pub username: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

impl UserService {
    /// Create a new user service.
    #[must_use]
    pub const fn new(user_repo: UserRepository) -> Self {
        Self {
            user_repo,
            id_gen: IdGenerator::new(),
        }
    }

    /// Register a user. New users start with zero reputation.
    pub async fn create(&self, input: CreateUserInput) -> AppResult<user::Model> {
        input.validate()?;

        if self
            .user_repo
            .find_by_username(&input.username)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let password_hash = hash_password(&input.password)?;

        let user_model = user::ActiveModel {
            id: Set(self.id_gen.generate()),
            username: Set(input.username.clone()),
            username_lower: Set(input.username.to_lowercase()),
            password: Set(password_hash),
            token: Set(Some(self.id_gen.generate_token())),
            reputation: Set(0),
            created_at: Set(chrono::Utc::now().into()),
            updated_at: Set(None),
        };

        self.user_repo.create(user_model).await
    }

    /// Get a user by ID.
    pub async fn get(&self, id: &str) -> AppResult<user::Model> {
        self.user_repo.get_by_id(id).await
    }

    /// Get a user by username.
    pub async fn get_by_username(&self, username: &str) -> AppResult<user::Model> {
        self.user_repo
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::UserNotFound(username.to_string()))
    }

    /// Authenticate a user by token.
    pub async fn authenticate_by_token(&self, token: &str) -> AppResult<user::Model> {
        self.user_repo
            .find_by_token(token)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Authenticate a user by username and password.
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<user::Model> {
        let user = self
            .user_repo
            .find_by_username(username)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !verify_password(password, &user.password)? {
            return Err(AppError::Unauthorized);
        }

        Ok(user)
    }

    /// Regenerate a user's authentication token.
    pub async fn regenerate_token(&self, user_id: &str) -> AppResult<String> {
        let user = self.user_repo.get_by_id(user_id).await?;
        let new_token = self.id_gen.generate_token();

        let mut active: user::ActiveModel = user.into();
        active.token = Set(Some(new_token.clone()));
        active.updated_at = Set(Some(chrono::Utc::now().into()));

        self.user_repo.update(active).await?;

        Ok(new_token)
    }
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {e}")))
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
