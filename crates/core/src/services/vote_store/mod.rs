//! Storage seam for vote transactions.
//!
//! A [`VoteStore`] hands out [`VoteUnit`]s. One unit carries exactly one vote
//! transaction: everything it reads and writes is committed or rolled back
//! together when the store is atomic. Non-atomic units apply each write
//! immediately.

mod db;
mod memory;

pub use db::DbVoteStore;
pub use memory::{FaultPoint, MemoryState, MemoryVoteStore};

use async_trait::async_trait;
use qna_common::AppResult;
use qna_db::entities::{TargetKind, VoteValue, answer, question, user, vote};
use serde::Serialize;

/// A question or answer as seen by the vote transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTarget {
    pub id: String,
    pub kind: TargetKind,
    pub author_id: String,
    pub upvotes: Vec<String>,
    pub downvotes: Vec<String>,
    /// Bumped by every membership save.
    pub version: i32,
}

impl VoteTarget {
    /// An empty target, as created by a new question or answer.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TargetKind, author_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            author_id: author_id.into(),
            upvotes: Vec::new(),
            downvotes: Vec::new(),
            version: 0,
        }
    }

    /// Which set, if any, currently holds the user.
    #[must_use]
    pub fn membership_of(&self, user_id: &str) -> Option<VoteValue> {
        if self.upvotes.iter().any(|id| id == user_id) {
            Some(VoteValue::Up)
        } else if self.downvotes.iter().any(|id| id == user_id) {
            Some(VoteValue::Down)
        } else {
            None
        }
    }

    /// Move the user to the set for `value`, or out of both sets for `None`.
    pub fn set_membership(&mut self, user_id: &str, value: Option<VoteValue>) {
        self.upvotes.retain(|id| id != user_id);
        self.downvotes.retain(|id| id != user_id);
        match value {
            Some(VoteValue::Up) => self.upvotes.push(user_id.to_string()),
            Some(VoteValue::Down) => self.downvotes.push(user_id.to_string()),
            None => {}
        }
    }
}

impl From<question::Model> for VoteTarget {
    fn from(model: question::Model) -> Self {
        Self {
            id: model.id,
            kind: TargetKind::Question,
            author_id: model.author_id,
            upvotes: member_ids(&model.upvotes),
            downvotes: member_ids(&model.downvotes),
            version: model.version,
        }
    }
}

impl From<answer::Model> for VoteTarget {
    fn from(model: answer::Model) -> Self {
        Self {
            id: model.id,
            kind: TargetKind::Answer,
            author_id: model.author_id,
            upvotes: member_ids(&model.upvotes),
            downvotes: member_ids(&model.downvotes),
            version: model.version,
        }
    }
}

/// User ids stored in a JSON membership array.
pub(crate) fn member_ids(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Factory for vote transaction units.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Open a unit for one vote transaction.
    async fn begin(&self) -> AppResult<Box<dyn VoteUnit>>;

    /// Target ids of one kind in ascending order, after `after_id`.
    async fn target_ids(
        &self,
        kind: TargetKind,
        after_id: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<String>>;
}

/// One vote transaction's view of storage.
#[async_trait]
pub trait VoteUnit: Send {
    /// Whether writes become visible only on [`VoteUnit::commit`].
    fn is_atomic(&self) -> bool;

    /// Load a target. Atomic units hold it exclusively until the unit ends.
    async fn load_target(&mut self, id: &str, kind: TargetKind) -> AppResult<Option<VoteTarget>>;

    /// The user's current vote on a target.
    async fn find_vote(
        &mut self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Option<vote::Model>>;

    /// Every current vote on a target.
    async fn list_votes(&mut self, target_id: &str, kind: TargetKind)
    -> AppResult<Vec<vote::Model>>;

    async fn load_user(&mut self, id: &str) -> AppResult<Option<user::Model>>;

    /// Insert a vote record. A duplicate (user, target, kind) fails with
    /// `ConcurrentModification`.
    async fn create_vote(&mut self, vote: vote::Model) -> AppResult<()>;

    async fn update_vote(&mut self, id: &str, value: VoteValue) -> AppResult<()>;

    async fn delete_vote(&mut self, id: &str) -> AppResult<()>;

    /// Add `delta` to the user's reputation. A missing user fails with
    /// `AuthorNotFound`.
    async fn adjust_reputation(&mut self, user_id: &str, delta: i64) -> AppResult<()>;

    /// Persist the membership sets. Fails with `ConcurrentModification` unless
    /// the stored version still equals `target.version`.
    async fn save_target(&mut self, target: &VoteTarget) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
