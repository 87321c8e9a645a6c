//! Vote service.
//!
//! Casting a vote touches three records as one unit: the voter's vote record,
//! the target's upvote/downvote membership, and the target author's
//! reputation. Re-casting the same value retracts the vote; casting the
//! opposite value flips it.

use std::sync::Arc;

use chrono::Utc;
use qna_common::{AppError, AppResult, IdGenerator, config::VotingConfig};
use qna_db::entities::{TargetKind, VoteValue, vote};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use validator::Validate;

use super::{
    reconciliation::{ReconciliationCandidate, ReconciliationSink, VoteStage},
    reputation::ReputationRules,
    target_lock::TargetLocks,
    vote_store::{VoteStore, VoteUnit},
};

/// Input for casting a vote, as received from the transport.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteInput {
    #[validate(length(min = 1, max = 64))]
    pub target_id: String,

    /// `Question` or `Answer`, any case.
    pub target_kind: String,

    /// `1` or `-1`, as a number or a numeric string.
    pub value: serde_json::Value,
}

/// What happened to the voter's vote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    Created,
    Updated,
    Deleted,
}

/// Result of a vote transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub reputation_delta: i64,
    pub vote_state: VoteState,
}

/// Normalize a loose vote value into `Up` or `Down`.
pub fn parse_vote_value(value: &serde_json::Value) -> AppResult<VoteValue> {
    let number = match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match number {
        Some(1) => Ok(VoteValue::Up),
        Some(-1) => Ok(VoteValue::Down),
        _ => Err(AppError::InvalidVoteValue(format!(
            "{value} (expected 1 or -1)"
        ))),
    }
}

/// Parse a target kind name, ignoring case.
pub fn parse_target_kind(kind: &str) -> AppResult<TargetKind> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "question" => Ok(TargetKind::Question),
        "answer" => Ok(TargetKind::Answer),
        _ => Err(AppError::InvalidTargetKind(kind.to_string())),
    }
}

enum Transition {
    Create,
    Flip(vote::Model),
    Retract(vote::Model),
}

/// Bookkeeping for one attempt, used to describe partial failures.
#[derive(Default)]
struct Progress {
    author_id: String,
    delta: i64,
    current: Option<VoteStage>,
    completed: Vec<VoteStage>,
}

impl Progress {
    fn start(&mut self, stage: VoteStage) {
        self.current = Some(stage);
    }

    fn finish(&mut self) {
        if let Some(stage) = self.current.take() {
            self.completed.push(stage);
        }
    }
}

/// Vote service for business logic.
#[derive(Clone)]
pub struct VoteService {
    store: Arc<dyn VoteStore>,
    sink: Arc<dyn ReconciliationSink>,
    rules: ReputationRules,
    locks: Arc<TargetLocks>,
    id_gen: IdGenerator,
    max_retries: u32,
}

impl VoteService {
    /// Create a new vote service.
    #[must_use]
    pub fn new(
        store: Arc<dyn VoteStore>,
        sink: Arc<dyn ReconciliationSink>,
        config: &VotingConfig,
    ) -> Self {
        Self {
            store,
            sink,
            rules: ReputationRules::new(),
            locks: Arc::new(TargetLocks::new()),
            id_gen: IdGenerator::new(),
            max_retries: config.max_retries,
        }
    }

    /// The lock map shared with anything else that writes vote membership.
    #[must_use]
    pub fn target_locks(&self) -> Arc<TargetLocks> {
        Arc::clone(&self.locks)
    }

    /// Cast a vote from loosely typed input.
    ///
    /// The value and kind are checked before the rest of the input.
    pub async fn cast(&self, user_id: &str, input: CastVoteInput) -> AppResult<VoteOutcome> {
        let value = parse_vote_value(&input.value)?;
        let kind = parse_target_kind(&input.target_kind)?;
        input.validate()?;
        self.cast_vote(user_id, &input.target_id, kind, value).await
    }

    /// Cast, flip, or retract a vote.
    ///
    /// `ConcurrentModification` from an attempt that left nothing applied is
    /// retried from scratch up to `max_retries` times.
    pub async fn cast_vote(
        &self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
        value: VoteValue,
    ) -> AppResult<VoteOutcome> {
        let _guard = self.locks.acquire(kind, target_id).await;

        let mut attempt = 0;
        let result = loop {
            match self.attempt(user_id, target_id, kind, value).await {
                Err(AppError::ConcurrentModification(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        user_id = %user_id,
                        target_id = %target_id,
                        attempt,
                        reason = %reason,
                        "Vote transaction conflicted, retrying"
                    );
                }
                other => break other,
            }
        };

        if let Ok(outcome) = &result {
            debug!(
                user_id = %user_id,
                target_id = %target_id,
                target_kind = %kind,
                delta = outcome.reputation_delta,
                state = ?outcome.vote_state,
                "Vote applied"
            );
        }
        result
    }

    /// The user's current vote on a target.
    pub async fn find_vote(
        &self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
    ) -> AppResult<Option<vote::Model>> {
        let mut unit = self.store.begin().await?;
        let found = unit.find_vote(user_id, target_id, kind).await;
        unit.rollback().await?;
        found
    }

    async fn attempt(
        &self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
        value: VoteValue,
    ) -> AppResult<VoteOutcome> {
        let mut unit = self.store.begin().await?;
        let atomic = unit.is_atomic();
        let mut progress = Progress::default();

        match self
            .apply(unit.as_mut(), &mut progress, user_id, target_id, kind, value)
            .await
        {
            Ok(outcome) => {
                progress.start(VoteStage::Commit);
                match unit.commit().await {
                    Ok(()) => Ok(outcome),
                    Err(err) if atomic => Err(err),
                    Err(err) => {
                        Err(self
                            .report_partial(user_id, target_id, kind, progress, err)
                            .await)
                    }
                }
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "Rollback of vote transaction failed");
                }
                if atomic || progress.completed.is_empty() {
                    Err(err)
                } else {
                    Err(self
                        .report_partial(user_id, target_id, kind, progress, err)
                        .await)
                }
            }
        }
    }

    /// Read, decide, then write vote record, author, and target in that order.
    async fn apply(
        &self,
        unit: &mut dyn VoteUnit,
        progress: &mut Progress,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
        value: VoteValue,
    ) -> AppResult<VoteOutcome> {
        let mut target = unit
            .load_target(target_id, kind)
            .await?
            .ok_or_else(|| AppError::TargetNotFound(format!("{kind} {target_id}")))?;
        let existing = unit.find_vote(user_id, target_id, kind).await?;
        let author = unit
            .load_user(&target.author_id)
            .await?
            .ok_or_else(|| AppError::AuthorNotFound(target.author_id.clone()))?;

        let prior = match &existing {
            Some(vote) => Some(vote.vote_value().ok_or_else(|| {
                AppError::Storage(format!("Vote {} holds invalid value {}", vote.id, vote.value))
            })?),
            None => None,
        };
        let delta = self.rules.delta(kind, value, prior);
        let transition = match existing {
            None => Transition::Create,
            Some(vote) if prior == Some(value) => Transition::Retract(vote),
            Some(vote) => Transition::Flip(vote),
        };

        progress.author_id = author.id;
        progress.delta = delta;

        progress.start(VoteStage::VoteRecord);
        let vote_state = match transition {
            Transition::Create => {
                let now = Utc::now();
                unit.create_vote(vote::Model {
                    id: self.id_gen.generate(),
                    user_id: user_id.to_string(),
                    target_id: target_id.to_string(),
                    target_kind: kind,
                    value: value.as_i16(),
                    created_at: now.into(),
                    updated_at: None,
                })
                .await?;
                VoteState::Created
            }
            Transition::Flip(vote) => {
                unit.update_vote(&vote.id, value).await?;
                VoteState::Updated
            }
            Transition::Retract(vote) => {
                unit.delete_vote(&vote.id).await?;
                VoteState::Deleted
            }
        };
        progress.finish();

        progress.start(VoteStage::AuthorReputation);
        unit.adjust_reputation(&progress.author_id, delta).await?;
        progress.finish();

        let membership = (vote_state != VoteState::Deleted).then_some(value);
        target.set_membership(user_id, membership);

        progress.start(VoteStage::TargetMembership);
        unit.save_target(&target).await?;
        progress.finish();

        Ok(VoteOutcome {
            reputation_delta: delta,
            vote_state,
        })
    }

    async fn report_partial(
        &self,
        user_id: &str,
        target_id: &str,
        kind: TargetKind,
        progress: Progress,
        err: AppError,
    ) -> AppError {
        let failed_stage = progress.current.unwrap_or(VoteStage::Commit);
        let message = err.to_string();

        self.sink
            .record(ReconciliationCandidate {
                user_id: user_id.to_string(),
                target_id: target_id.to_string(),
                target_kind: kind,
                author_id: progress.author_id,
                failed_stage,
                completed_stages: progress.completed,
                reputation_delta: progress.delta,
                error: message.clone(),
                recorded_at: Utc::now(),
            })
            .await;

        AppError::Storage(format!(
            "Vote partially applied, {failed_stage} failed: {message}"
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::{
        reconciliation::{ConsistencyScanner, LoggingReconciliationSink},
        vote_store::{FaultPoint, MemoryVoteStore},
    };
    use serde_json::json;
    use std::collections::HashMap;

    const AUTHOR: &str = "author";

    struct Fixture {
        store: MemoryVoteStore,
        sink: Arc<LoggingReconciliationSink>,
        service: VoteService,
    }

    async fn fixture_with(store: MemoryVoteStore, max_retries: u32) -> Fixture {
        store.insert_user(AUTHOR, 0).await;
        store.insert_target(TargetKind::Question, "q1", AUTHOR).await;
        store.insert_target(TargetKind::Answer, "a1", AUTHOR).await;

        let sink = Arc::new(LoggingReconciliationSink::new());
        let config = VotingConfig {
            max_retries,
            ..VotingConfig::default()
        };
        let service = VoteService::new(Arc::new(store.clone()), sink.clone(), &config);
        Fixture {
            store,
            sink,
            service,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MemoryVoteStore::new(), 3).await
    }

    /// Every user is in the set matching their vote record, and nowhere else.
    async fn assert_membership_matches_records(store: &MemoryVoteStore, kind: TargetKind, id: &str) {
        let state = store.snapshot().await;
        let target = state.targets.get(&(kind, id.to_string())).unwrap();
        let records: Vec<_> = state
            .votes
            .values()
            .filter(|v| v.target_id == id && v.target_kind == kind)
            .collect();

        let mut expected_up: Vec<&str> = records
            .iter()
            .filter(|v| v.vote_value() == Some(VoteValue::Up))
            .map(|v| v.user_id.as_str())
            .collect();
        let mut expected_down: Vec<&str> = records
            .iter()
            .filter(|v| v.vote_value() == Some(VoteValue::Down))
            .map(|v| v.user_id.as_str())
            .collect();
        let mut up: Vec<&str> = target.upvotes.iter().map(String::as_str).collect();
        let mut down: Vec<&str> = target.downvotes.iter().map(String::as_str).collect();
        for ids in [&mut expected_up, &mut expected_down, &mut up, &mut down] {
            ids.sort_unstable();
        }

        assert_eq!(up, expected_up);
        assert_eq!(down, expected_down);
    }

    #[test]
    fn test_parse_vote_value() {
        assert_eq!(parse_vote_value(&json!(1)).unwrap(), VoteValue::Up);
        assert_eq!(parse_vote_value(&json!(-1)).unwrap(), VoteValue::Down);
        assert_eq!(parse_vote_value(&json!("1")).unwrap(), VoteValue::Up);
        assert_eq!(parse_vote_value(&json!(" -1 ")).unwrap(), VoteValue::Down);
        assert_eq!(parse_vote_value(&json!(1.0)).unwrap(), VoteValue::Up);

        for bad in [json!(2), json!(0), json!(0.5), json!("up"), json!(null), json!(true), json!([1])] {
            assert!(matches!(
                parse_vote_value(&bad),
                Err(AppError::InvalidVoteValue(_))
            ));
        }
    }

    #[test]
    fn test_parse_target_kind() {
        assert_eq!(parse_target_kind("Question").unwrap(), TargetKind::Question);
        assert_eq!(parse_target_kind("answer").unwrap(), TargetKind::Answer);
        assert_eq!(parse_target_kind(" ANSWER ").unwrap(), TargetKind::Answer);
        assert!(matches!(
            parse_target_kind("Comment"),
            Err(AppError::InvalidTargetKind(_))
        ));
    }

    #[tokio::test]
    async fn test_upvote_fresh_question() {
        let f = fixture().await;

        let outcome = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await
            .unwrap();

        assert_eq!(outcome.reputation_delta, 5);
        assert_eq!(outcome.vote_state, VoteState::Created);
        let target = f.store.target(TargetKind::Question, "q1").await.unwrap();
        assert_eq!(target.upvotes, vec!["u1".to_string()]);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(5));
    }

    #[tokio::test]
    async fn test_same_vote_twice_retracts() {
        let f = fixture().await;
        f.service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await
            .unwrap();

        let outcome = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await
            .unwrap();

        assert_eq!(outcome.reputation_delta, -5);
        assert_eq!(outcome.vote_state, VoteState::Deleted);
        let target = f.store.target(TargetKind::Question, "q1").await.unwrap();
        assert_eq!(target.membership_of("u1"), None);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));
        assert!(f.store.snapshot().await.votes.is_empty());
    }

    #[tokio::test]
    async fn test_flip_answer_vote() {
        let f = fixture().await;
        let first = f
            .service
            .cast_vote("u1", "a1", TargetKind::Answer, VoteValue::Down)
            .await
            .unwrap();
        assert_eq!(first.reputation_delta, -2);

        let outcome = f
            .service
            .cast_vote("u1", "a1", TargetKind::Answer, VoteValue::Up)
            .await
            .unwrap();

        assert_eq!(outcome.reputation_delta, 12);
        assert_eq!(outcome.vote_state, VoteState::Updated);
        let target = f.store.target(TargetKind::Answer, "a1").await.unwrap();
        assert_eq!(target.upvotes, vec!["u1".to_string()]);
        assert!(target.downvotes.is_empty());
        assert_eq!(f.store.reputation(AUTHOR).await, Some(10));
    }

    #[tokio::test]
    async fn test_invalid_value_changes_nothing() {
        let f = fixture().await;
        let before = f.store.snapshot().await;

        let result = f
            .service
            .cast(
                "u1",
                CastVoteInput {
                    target_id: "q1".to_string(),
                    target_kind: "Question".to_string(),
                    value: json!(2),
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::InvalidVoteValue(_))));
        let after = f.store.snapshot().await;
        assert!(after.votes.is_empty());
        assert_eq!(
            after.targets.get(&(TargetKind::Question, "q1".to_string())),
            before.targets.get(&(TargetKind::Question, "q1".to_string()))
        );
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));
    }

    #[tokio::test]
    async fn test_bad_value_reported_before_other_input_errors() {
        let f = fixture().await;

        let result = f
            .service
            .cast(
                "u1",
                CastVoteInput {
                    target_id: String::new(),
                    target_kind: "Question".to_string(),
                    value: json!(2),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidVoteValue(_))));

        let result = f
            .service
            .cast(
                "u1",
                CastVoteInput {
                    target_id: String::new(),
                    target_kind: "Comment".to_string(),
                    value: json!(1),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::InvalidTargetKind(_))));
    }

    #[tokio::test]
    async fn test_missing_target_changes_nothing() {
        let f = fixture().await;

        let result = f
            .service
            .cast_vote("u1", "nope", TargetKind::Question, VoteValue::Up)
            .await;

        assert!(matches!(result, Err(AppError::TargetNotFound(_))));
        assert!(f.store.snapshot().await.votes.is_empty());
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));
    }

    #[tokio::test]
    async fn test_missing_author() {
        let f = fixture().await;
        f.store
            .insert_target(TargetKind::Answer, "orphan", "deleted-user")
            .await;

        let result = f
            .service
            .cast_vote("u1", "orphan", TargetKind::Answer, VoteValue::Up)
            .await;

        assert!(matches!(result, Err(AppError::AuthorNotFound(id)) if id == "deleted-user"));
        assert!(f.store.snapshot().await.votes.is_empty());
    }

    #[tokio::test]
    async fn test_cast_accepts_loose_input() {
        let f = fixture().await;

        let outcome = f
            .service
            .cast(
                "u1",
                CastVoteInput {
                    target_id: "a1".to_string(),
                    target_kind: "answer".to_string(),
                    value: json!("-1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.reputation_delta, -2);
        let vote = f
            .service
            .find_vote("u1", "a1", TargetKind::Answer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vote.vote_value(), Some(VoteValue::Down));
    }

    #[tokio::test]
    async fn test_outcome_serializes_for_clients() {
        let outcome = VoteOutcome {
            reputation_delta: -5,
            vote_state: VoteState::Deleted,
        };
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({"reputationDelta": -5, "voteState": "deleted"})
        );
    }

    #[tokio::test]
    async fn test_atomic_failure_leaves_no_partial_effect() {
        let f = fixture().await;
        f.store
            .fail_next(FaultPoint::SaveTarget, AppError::Storage("disk full".to_string()))
            .await;

        let result = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await;

        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(f.store.snapshot().await.votes.is_empty());
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));
        assert_eq!(f.sink.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let f = fixture().await;
        f.store
            .fail_next(
                FaultPoint::SaveTarget,
                AppError::ConcurrentModification("raced".to_string()),
            )
            .await;

        let outcome = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await
            .unwrap();

        assert_eq!(outcome.vote_state, VoteState::Created);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(5));
        assert_eq!(f.store.snapshot().await.votes.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_retries_exhausted() {
        let f = fixture_with(MemoryVoteStore::new(), 1).await;
        for _ in 0..2 {
            f.store
                .fail_next(
                    FaultPoint::Commit,
                    AppError::ConcurrentModification("raced".to_string()),
                )
                .await;
        }

        let result = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await;

        assert!(matches!(result, Err(AppError::ConcurrentModification(_))));
        assert!(f.store.snapshot().await.votes.is_empty());
    }

    #[tokio::test]
    async fn test_non_atomic_partial_failure_is_reported_and_repairable() {
        let f = fixture_with(MemoryVoteStore::non_atomic(), 3).await;
        f.store
            .fail_next(
                FaultPoint::AdjustReputation,
                AppError::Storage("connection reset".to_string()),
            )
            .await;

        let result = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));

        // Vote record landed, the rest did not.
        assert_eq!(f.store.snapshot().await.votes.len(), 1);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));

        let pending = f.sink.drain().await;
        assert_eq!(pending.len(), 1);
        let candidate = &pending[0];
        assert_eq!(candidate.failed_stage, VoteStage::AuthorReputation);
        assert_eq!(candidate.completed_stages, vec![VoteStage::VoteRecord]);
        assert_eq!(candidate.reputation_delta, 5);
        assert_eq!(candidate.author_id, AUTHOR);
        f.sink.requeue(candidate.clone()).await;

        let scanner =
            ConsistencyScanner::new(Arc::new(f.store.clone()), f.sink.clone(), 10)
                .with_locks(f.service.target_locks());
        scanner.run_once().await.unwrap();

        assert_eq!(f.store.reputation(AUTHOR).await, Some(5));
        assert_membership_matches_records(&f.store, TargetKind::Question, "q1").await;
    }

    #[tokio::test]
    async fn test_non_atomic_failure_before_any_write_is_not_reported() {
        let f = fixture_with(MemoryVoteStore::non_atomic(), 0).await;
        f.store
            .fail_next(FaultPoint::CreateVote, AppError::Storage("down".to_string()))
            .await;

        let result = f
            .service
            .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up)
            .await;

        assert!(matches!(result, Err(AppError::Storage(_))));
        assert_eq!(f.sink.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_sequence_keeps_membership_and_reputation_consistent() {
        let f = fixture().await;
        let rules = ReputationRules::new();
        let users = ["u1", "u2", "u3", "u4"];
        let mut current: HashMap<&str, VoteValue> = HashMap::new();
        let mut expected_reputation = 0;

        // Deterministic mix of casts, flips, and retractions.
        let mut seed: u32 = 17;
        for _ in 0..60 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let user = users[(seed >> 16) as usize % users.len()];
            let value = if (seed >> 8) & 1 == 0 {
                VoteValue::Up
            } else {
                VoteValue::Down
            };

            let prior = current.get(user).copied();
            let outcome = f
                .service
                .cast_vote(user, "a1", TargetKind::Answer, value)
                .await
                .unwrap();

            let expected = rules.delta(TargetKind::Answer, value, prior);
            assert_eq!(outcome.reputation_delta, expected);
            expected_reputation += expected;
            if prior == Some(value) {
                current.remove(user);
            } else {
                current.insert(user, value);
            }

            assert_membership_matches_records(&f.store, TargetKind::Answer, "a1").await;
        }

        // Replayed sum equals the points of the votes left standing.
        let standing: i64 = current
            .values()
            .map(|v| rules.points(TargetKind::Answer, *v))
            .sum();
        assert_eq!(expected_reputation, standing);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(expected_reputation));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_voters_on_one_target() {
        let f = fixture().await;

        let casts = (0..32).map(|i| {
            let service = f.service.clone();
            async move {
                let user = format!("user{i}");
                let value = if i % 3 == 0 { VoteValue::Down } else { VoteValue::Up };
                tokio::spawn(async move {
                    service
                        .cast_vote(&user, "q1", TargetKind::Question, value)
                        .await
                })
                .await
                .unwrap()
            }
        });
        let outcomes = futures::future::join_all(casts).await;

        let total: i64 = outcomes
            .into_iter()
            .map(|o| o.unwrap().reputation_delta)
            .sum();
        let target = f.store.target(TargetKind::Question, "q1").await.unwrap();
        assert_eq!(target.upvotes.len() + target.downvotes.len(), 32);
        assert_eq!(target.version, 32);
        assert_eq!(f.store.reputation(AUTHOR).await, Some(total));
        assert_membership_matches_records(&f.store, TargetKind::Question, "q1").await;
        assert!(f.service.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_double_click_toggles_on_then_off() {
        let f = fixture_with(MemoryVoteStore::non_atomic(), 3).await;

        let (first, second) = tokio::join!(
            f.service
                .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up),
            f.service
                .cast_vote("u1", "q1", TargetKind::Question, VoteValue::Up),
        );

        let mut states = [first.unwrap().vote_state, second.unwrap().vote_state];
        states.sort_by_key(|s| *s as u8);
        assert_eq!(states, [VoteState::Created, VoteState::Deleted]);
        assert!(f.store.snapshot().await.votes.is_empty());
        assert_eq!(f.store.reputation(AUTHOR).await, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_inserts_keep_one_record() {
        let store = MemoryVoteStore::non_atomic();
        let record = |id: &str| vote::Model {
            id: id.to_string(),
            user_id: "u1".to_string(),
            target_id: "q1".to_string(),
            target_kind: TargetKind::Question,
            value: VoteValue::Up.as_i16(),
            created_at: Utc::now().into(),
            updated_at: None,
        };

        let inserts = ["v1", "v2", "v3", "v4"].map(|id| {
            let store = store.clone();
            let vote = record(id);
            tokio::spawn(async move {
                let mut unit = store.begin().await?;
                unit.create_vote(vote).await
            })
        });

        let mut created = 0;
        let mut rejected = 0;
        for handle in inserts {
            match handle.await.unwrap() {
                Ok(()) => created += 1,
                Err(AppError::ConcurrentModification(_)) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((created, rejected), (1, 3));
        assert_eq!(store.snapshot().await.votes.len(), 1);
    }
}
