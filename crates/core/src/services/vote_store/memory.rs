//! In-process vote store.
//!
//! Atomic mode stages every write on a private copy of the state and holds the
//! store lock for the unit's whole lifetime, so commit publishes all writes at
//! once and rollback discards them. Non-atomic mode applies each write as it
//! happens, the way a store without multi-document transactions behaves.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use qna_common::{AppError, AppResult};
use qna_db::entities::{TargetKind, VoteValue, user, vote};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{VoteStore, VoteTarget, VoteUnit};

/// A write step that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    CreateVote,
    UpdateVote,
    DeleteVote,
    AdjustReputation,
    SaveTarget,
    Commit,
}

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub users: HashMap<String, user::Model>,
    pub targets: HashMap<(TargetKind, String), VoteTarget>,
    /// Vote records by id.
    pub votes: HashMap<String, vote::Model>,
}

impl MemoryState {
    fn find_vote(&self, user_id: &str, target_id: &str, kind: TargetKind) -> Option<&vote::Model> {
        self.votes.values().find(|v| {
            v.user_id == user_id && v.target_id == target_id && v.target_kind == kind
        })
    }

    fn create_vote(&mut self, vote: vote::Model) -> AppResult<()> {
        if self
            .find_vote(&vote.user_id, &vote.target_id, vote.target_kind)
            .is_some()
        {
            return Err(AppError::ConcurrentModification(format!(
                "Duplicate vote by {} on {} {}",
                vote.user_id, vote.target_kind, vote.target_id
            )));
        }
        self.votes.insert(vote.id.clone(), vote);
        Ok(())
    }

    fn update_vote(&mut self, id: &str, value: VoteValue) -> AppResult<()> {
        let vote = self.votes.get_mut(id).ok_or_else(|| {
            AppError::ConcurrentModification(format!("Vote {id} disappeared before update"))
        })?;
        vote.value = value.as_i16();
        vote.updated_at = Some(Utc::now().into());
        Ok(())
    }

    fn delete_vote(&mut self, id: &str) -> AppResult<()> {
        self.votes.remove(id).map(|_| ()).ok_or_else(|| {
            AppError::ConcurrentModification(format!("Vote {id} disappeared before delete"))
        })
    }

    fn adjust_reputation(&mut self, user_id: &str, delta: i64) -> AppResult<()> {
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::AuthorNotFound(user_id.to_string()))?;
        user.reputation += delta;
        Ok(())
    }

    fn save_target(&mut self, target: &VoteTarget) -> AppResult<()> {
        let stored = self
            .targets
            .get_mut(&(target.kind, target.id.clone()))
            .ok_or_else(|| AppError::TargetNotFound(target.id.clone()))?;
        if stored.version != target.version {
            return Err(AppError::ConcurrentModification(format!(
                "{} {} changed since version {}",
                target.kind, target.id, target.version
            )));
        }
        stored.upvotes = target.upvotes.clone();
        stored.downvotes = target.downvotes.clone();
        stored.version += 1;
        Ok(())
    }
}

#[derive(Default)]
struct Shared {
    data: MemoryState,
    faults: Vec<(FaultPoint, AppError)>,
}

impl Shared {
    fn check(&mut self, point: FaultPoint) -> AppResult<()> {
        match self.faults.iter().position(|(p, _)| *p == point) {
            Some(index) => Err(self.faults.remove(index).1),
            None => Ok(()),
        }
    }
}

/// Vote store kept entirely in process memory.
#[derive(Clone)]
pub struct MemoryVoteStore {
    shared: Arc<Mutex<Shared>>,
    atomic: bool,
}

impl Default for MemoryVoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVoteStore {
    /// Create an atomic in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            atomic: true,
        }
    }

    /// Create a store whose writes apply one by one with no rollback.
    #[must_use]
    pub fn non_atomic() -> Self {
        Self {
            atomic: false,
            ..Self::new()
        }
    }

    /// Insert or replace a user.
    pub async fn insert_user(&self, id: &str, reputation: i64) {
        let user = user::Model {
            id: id.to_string(),
            username: id.to_string(),
            username_lower: id.to_lowercase(),
            password: String::new(),
            token: None,
            reputation,
            created_at: Utc::now().into(),
            updated_at: None,
        };
        self.shared
            .lock()
            .await
            .data
            .users
            .insert(id.to_string(), user);
    }

    /// Insert or replace a target with empty membership.
    pub async fn insert_target(&self, kind: TargetKind, id: &str, author_id: &str) {
        self.shared
            .lock()
            .await
            .data
            .targets
            .insert((kind, id.to_string()), VoteTarget::new(id, kind, author_id));
    }

    /// Overwrite a target's stored membership without touching its version.
    pub async fn set_membership(
        &self,
        kind: TargetKind,
        id: &str,
        upvotes: Vec<String>,
        downvotes: Vec<String>,
    ) {
        if let Some(target) = self
            .shared
            .lock()
            .await
            .data
            .targets
            .get_mut(&(kind, id.to_string()))
        {
            target.upvotes = upvotes;
            target.downvotes = downvotes;
        }
    }

    /// Make the next write at `point` fail with `error`.
    pub async fn fail_next(&self, point: FaultPoint, error: AppError) {
        self.shared.lock().await.faults.push((point, error));
    }

    /// Current reputation of a user.
    pub async fn reputation(&self, user_id: &str) -> Option<i64> {
        self.shared
            .lock()
            .await
            .data
            .users
            .get(user_id)
            .map(|u| u.reputation)
    }

    /// Current state of a target.
    pub async fn target(&self, kind: TargetKind, id: &str) -> Option<VoteTarget> {
        self.shared
            .lock()
            .await
            .data
            .targets
            .get(&(kind, id.to_string()))
            .cloned()
    }

    /// Copy of the whole committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.shared.lock().await.data.clone()
    }
}

#[async_trait]
impl VoteStore for MemoryVoteStore {
    async fn begin(&self) -> AppResult<Box<dyn VoteUnit>> {
        if self.atomic {
            let guard = self.shared.clone().lock_owned().await;
            let staged = guard.data.clone();
            Ok(Box::new(StagedUnit { guard, staged }))
        } else {
            Ok(Box::new(DirectUnit {
                shared: self.shared.clone(),
            }))
        }
    }

    async fn target_ids(
        &self,
        kind: TargetKind,
        after_id: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let shared = self.shared.lock().await;
        let mut ids: Vec<String> = shared
            .data
            .targets
            .keys()
            .filter(|(k, id)| *k == kind && after_id.is_none_or(|after| id.as_str() > after))
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(ids)
    }
}

/// Atomic unit: owns the store lock, writes go to `staged`.
struct StagedUnit {
    guard: OwnedMutexGuard<Shared>,
    staged: MemoryState,
}

#[async_trait]
impl VoteUnit for StagedUnit {
    fn is_atomic(&self) -> bool {
        true
    }

    async fn load_target(&mut self, id: &str, kind: TargetKind) -> AppResult<Option<VoteTarget>> {
        Ok(self.staged.targets.get(&(kind, id.to_string())).cloned())
    }

    async fn find_vote(
        &mut self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Option<vote::Model>> {
        Ok(self.staged.find_vote(user_id, target_id, kind).cloned())
    }

    async fn list_votes(
        &mut self,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Vec<vote::Model>> {
        Ok(list_votes(&self.staged, target_id, kind))
    }

    async fn load_user(&mut self, id: &str) -> AppResult<Option<user::Model>> {
        Ok(self.staged.users.get(id).cloned())
    }

    async fn create_vote(&mut self, vote: vote::Model) -> AppResult<()> {
        self.guard.check(FaultPoint::CreateVote)?;
        self.staged.create_vote(vote)
    }

    async fn update_vote(&mut self, id: &str, value: VoteValue) -> AppResult<()> {
        self.guard.check(FaultPoint::UpdateVote)?;
        self.staged.update_vote(id, value)
    }

    async fn delete_vote(&mut self, id: &str) -> AppResult<()> {
        self.guard.check(FaultPoint::DeleteVote)?;
        self.staged.delete_vote(id)
    }

    async fn adjust_reputation(&mut self, user_id: &str, delta: i64) -> AppResult<()> {
        self.guard.check(FaultPoint::AdjustReputation)?;
        self.staged.adjust_reputation(user_id, delta)
    }

    async fn save_target(&mut self, target: &VoteTarget) -> AppResult<()> {
        self.guard.check(FaultPoint::SaveTarget)?;
        self.staged.save_target(target)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self { mut guard, staged } = *self;
        guard.check(FaultPoint::Commit)?;
        guard.data = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

/// Non-atomic unit: every call locks, applies, and releases.
struct DirectUnit {
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl VoteUnit for DirectUnit {
    fn is_atomic(&self) -> bool {
        false
    }

    async fn load_target(&mut self, id: &str, kind: TargetKind) -> AppResult<Option<VoteTarget>> {
        let shared = self.shared.lock().await;
        Ok(shared.data.targets.get(&(kind, id.to_string())).cloned())
    }

    async fn find_vote(
        &mut self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Option<vote::Model>> {
        let shared = self.shared.lock().await;
        Ok(shared.data.find_vote(user_id, target_id, kind).cloned())
    }

    async fn list_votes(
        &mut self,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Vec<vote::Model>> {
        let shared = self.shared.lock().await;
        Ok(list_votes(&shared.data, target_id, kind))
    }

    async fn load_user(&mut self, id: &str) -> AppResult<Option<user::Model>> {
        let shared = self.shared.lock().await;
        Ok(shared.data.users.get(id).cloned())
    }

    async fn create_vote(&mut self, vote: vote::Model) -> AppResult<()> {
        let mut shared = self.shared.lock().await;
        shared.check(FaultPoint::CreateVote)?;
        shared.data.create_vote(vote)
    }

    async fn update_vote(&mut self, id: &str, value: VoteValue) -> AppResult<()> {
        let mut shared = self.shared.lock().await;
        shared.check(FaultPoint::UpdateVote)?;
        shared.data.update_vote(id, value)
    }

    async fn delete_vote(&mut self, id: &str) -> AppResult<()> {
        let mut shared = self.shared.lock().await;
        shared.check(FaultPoint::DeleteVote)?;
        shared.data.delete_vote(id)
    }

    async fn adjust_reputation(&mut self, user_id: &str, delta: i64) -> AppResult<()> {
        let mut shared = self.shared.lock().await;
        shared.check(FaultPoint::AdjustReputation)?;
        shared.data.adjust_reputation(user_id, delta)
    }

    async fn save_target(&mut self, target: &VoteTarget) -> AppResult<()> {
        let mut shared = self.shared.lock().await;
        shared.check(FaultPoint::SaveTarget)?;
        shared.data.save_target(target)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.shared.lock().await.check(FaultPoint::Commit)
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        // Nothing staged; earlier writes stay applied.
        Ok(())
    }
}

fn list_votes(state: &MemoryState, target_id: &str, kind: TargetKind) -> Vec<vote::Model> {
    let mut votes: Vec<vote::Model> = state
        .votes
        .values()
        .filter(|v| v.target_id == target_id && v.target_kind == kind)
        .cloned()
        .collect();
    votes.sort_by(|a, b| a.id.cmp(&b.id));
    votes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn new_vote(id: &str, user_id: &str, target_id: &str) -> vote::Model {
        vote::Model {
            id: id.to_string(),
            user_id: user_id.to_string(),
            target_id: target_id.to_string(),
            target_kind: TargetKind::Question,
            value: VoteValue::Up.as_i16(),
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    async fn seeded(store: &MemoryVoteStore) {
        store.insert_user("author", 0).await;
        store.insert_target(TargetKind::Question, "q1", "author").await;
    }

    #[tokio::test]
    async fn test_atomic_rollback_discards_writes() {
        let store = MemoryVoteStore::new();
        seeded(&store).await;

        let mut unit = store.begin().await.unwrap();
        unit.create_vote(new_vote("v1", "u1", "q1")).await.unwrap();
        unit.adjust_reputation("author", 5).await.unwrap();
        unit.rollback().await.unwrap();

        assert!(store.snapshot().await.votes.is_empty());
        assert_eq!(store.reputation("author").await, Some(0));
    }

    #[tokio::test]
    async fn test_atomic_commit_publishes_writes() {
        let store = MemoryVoteStore::new();
        seeded(&store).await;

        let mut unit = store.begin().await.unwrap();
        unit.create_vote(new_vote("v1", "u1", "q1")).await.unwrap();
        unit.adjust_reputation("author", 5).await.unwrap();
        unit.commit().await.unwrap();

        assert_eq!(store.snapshot().await.votes.len(), 1);
        assert_eq!(store.reputation("author").await, Some(5));
    }

    #[tokio::test]
    async fn test_non_atomic_writes_survive_rollback() {
        let store = MemoryVoteStore::non_atomic();
        seeded(&store).await;

        let mut unit = store.begin().await.unwrap();
        assert!(!unit.is_atomic());
        unit.create_vote(new_vote("v1", "u1", "q1")).await.unwrap();
        unit.rollback().await.unwrap();

        assert_eq!(store.snapshot().await.votes.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_vote_rejected() {
        let store = MemoryVoteStore::non_atomic();
        seeded(&store).await;

        let mut unit = store.begin().await.unwrap();
        unit.create_vote(new_vote("v1", "u1", "q1")).await.unwrap();
        let result = unit.create_vote(new_vote("v2", "u1", "q1")).await;

        assert!(matches!(result, Err(AppError::ConcurrentModification(_))));
    }

    #[tokio::test]
    async fn test_save_target_checks_version() {
        let store = MemoryVoteStore::non_atomic();
        seeded(&store).await;

        let mut unit = store.begin().await.unwrap();
        let mut target = unit
            .load_target("q1", TargetKind::Question)
            .await
            .unwrap()
            .unwrap();
        target.set_membership("u1", Some(VoteValue::Up));
        unit.save_target(&target).await.unwrap();

        // Same stale copy again.
        let result = unit.save_target(&target).await;
        assert!(matches!(result, Err(AppError::ConcurrentModification(_))));
        assert_eq!(
            store.target(TargetKind::Question, "q1").await.unwrap().version,
            1
        );
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let store = MemoryVoteStore::new();
        seeded(&store).await;
        store
            .fail_next(FaultPoint::AdjustReputation, AppError::Storage("boom".to_string()))
            .await;

        let mut unit = store.begin().await.unwrap();
        assert!(unit.adjust_reputation("author", 5).await.is_err());
        unit.adjust_reputation("author", 5).await.unwrap();
        unit.commit().await.unwrap();

        assert_eq!(store.reputation("author").await, Some(5));
    }

    #[tokio::test]
    async fn test_target_ids_paginate() {
        let store = MemoryVoteStore::new();
        for id in ["a3", "a1", "a2"] {
            store.insert_target(TargetKind::Answer, id, "author").await;
        }
        store.insert_target(TargetKind::Question, "q1", "author").await;

        let first = store.target_ids(TargetKind::Answer, None, 2).await.unwrap();
        assert_eq!(first, vec!["a1".to_string(), "a2".to_string()]);
        let rest = store
            .target_ids(TargetKind::Answer, Some("a2"), 2)
            .await
            .unwrap();
        assert_eq!(rest, vec!["a3".to_string()]);
    }
}
