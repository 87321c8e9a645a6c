//! Reconciliation of partially applied vote transactions.
//!
//! Only non-atomic stores can leave a transaction half done. The vote record is
//! always written first, so vote records are treated as the source of truth:
//! target membership is rebuilt from them and a missed author adjustment is
//! re-applied from the recorded delta.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qna_common::{AppError, AppResult};
use qna_db::entities::{TargetKind, VoteValue};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    target_lock::TargetLocks,
    vote_store::{VoteStore, VoteTarget},
};

/// Write steps of a vote transaction, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoteStage {
    VoteRecord,
    AuthorReputation,
    TargetMembership,
    Commit,
}

impl fmt::Display for VoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VoteRecord => "vote_record",
            Self::AuthorReputation => "author_reputation",
            Self::TargetMembership => "target_membership",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A vote transaction that stopped after some of its writes were applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationCandidate {
    pub user_id: String,
    pub target_id: String,
    pub target_kind: TargetKind,
    pub author_id: String,
    pub failed_stage: VoteStage,
    pub completed_stages: Vec<VoteStage>,
    pub reputation_delta: i64,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationCandidate {
    /// Whether the author's reputation still lacks this transaction's delta.
    #[must_use]
    pub fn reputation_pending(&self) -> bool {
        !self.completed_stages.contains(&VoteStage::AuthorReputation)
    }
}

/// Receiver for partially applied transactions.
#[async_trait]
pub trait ReconciliationSink: Send + Sync {
    async fn record(&self, candidate: ReconciliationCandidate);
}

/// Logs each candidate and keeps it queued for the [`ConsistencyScanner`].
#[derive(Default)]
pub struct LoggingReconciliationSink {
    pending: Mutex<Vec<ReconciliationCandidate>>,
}

impl LoggingReconciliationSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued candidate.
    pub async fn drain(&self) -> Vec<ReconciliationCandidate> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    /// Put a candidate back without logging it again.
    pub async fn requeue(&self, candidate: ReconciliationCandidate) {
        self.pending.lock().await.push(candidate);
    }

    /// Number of queued candidates.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[async_trait]
impl ReconciliationSink for LoggingReconciliationSink {
    async fn record(&self, candidate: ReconciliationCandidate) {
        error!(
            target: "qna::reconcile",
            user_id = %candidate.user_id,
            target_id = %candidate.target_id,
            target_kind = %candidate.target_kind,
            author_id = %candidate.author_id,
            failed_stage = %candidate.failed_stage,
            completed_stages = ?candidate.completed_stages,
            reputation_delta = candidate.reputation_delta,
            error = %candidate.error,
            "Vote transaction partially applied"
        );
        self.pending.lock().await.push(candidate);
    }
}

/// Outcome of repairing one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub target_id: String,
    pub target_kind: TargetKind,
    /// Whether the membership sets had to be rewritten.
    pub membership_rebuilt: bool,
    /// Reputation re-applied to the author.
    pub reputation_applied: i64,
}

/// Totals for one scanner pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub candidates_resolved: usize,
    pub candidates_requeued: usize,
    pub targets_examined: usize,
    pub targets_repaired: usize,
}

/// A failed repair, and whether its reputation write already landed.
struct RepairFailure {
    error: AppError,
    reputation_written: bool,
}

/// Cross-checks vote records against target membership and repairs drift.
#[derive(Clone)]
pub struct ConsistencyScanner {
    store: Arc<dyn VoteStore>,
    sink: Arc<LoggingReconciliationSink>,
    locks: Arc<TargetLocks>,
    batch_size: u64,
}

impl ConsistencyScanner {
    /// Create a new scanner.
    #[must_use]
    pub fn new(
        store: Arc<dyn VoteStore>,
        sink: Arc<LoggingReconciliationSink>,
        batch_size: u64,
    ) -> Self {
        Self {
            store,
            sink,
            locks: Arc::new(TargetLocks::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Serialize repairs with the vote transactions that use `locks`.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<TargetLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Rebuild a target's membership from its vote records.
    pub async fn repair_target(&self, kind: TargetKind, target_id: &str) -> AppResult<RepairReport> {
        self.repair(kind, target_id, None)
            .await
            .map_err(|failure| failure.error)
    }

    /// Resolve one candidate: re-apply a missed reputation delta, then rebuild
    /// membership.
    pub async fn reconcile(&self, candidate: &ReconciliationCandidate) -> AppResult<RepairReport> {
        self.try_reconcile(candidate)
            .await
            .map_err(|failure| failure.error)
    }

    async fn try_reconcile(
        &self,
        candidate: &ReconciliationCandidate,
    ) -> Result<RepairReport, RepairFailure> {
        let pending = candidate
            .reputation_pending()
            .then(|| (candidate.author_id.as_str(), candidate.reputation_delta));
        self.repair(candidate.target_kind, &candidate.target_id, pending)
            .await
    }

    async fn repair(
        &self,
        kind: TargetKind,
        target_id: &str,
        pending_reputation: Option<(&str, i64)>,
    ) -> Result<RepairReport, RepairFailure> {
        let _guard = self.locks.acquire(kind, target_id).await;

        let mut unit = self.store.begin().await.map_err(|error| RepairFailure {
            error,
            reputation_written: false,
        })?;
        let atomic = unit.is_atomic();
        let mut reputation_written = false;

        let outcome = async {
            let mut target = unit
                .load_target(target_id, kind)
                .await?
                .ok_or_else(|| AppError::TargetNotFound(format!("{kind} {target_id}")))?;

            let mut reputation_applied = 0;
            if let Some((author_id, delta)) = pending_reputation {
                unit.adjust_reputation(author_id, delta).await?;
                reputation_written = true;
                reputation_applied = delta;
            }

            let votes = unit.list_votes(target_id, kind).await?;
            let (upvotes, downvotes) = membership_from_votes(&votes);
            let membership_rebuilt = !same_members(&target, &upvotes, &downvotes);
            if membership_rebuilt {
                target.upvotes = upvotes;
                target.downvotes = downvotes;
                unit.save_target(&target).await?;
            }

            Ok::<_, AppError>(RepairReport {
                target_id: target_id.to_string(),
                target_kind: kind,
                membership_rebuilt,
                reputation_applied,
            })
        }
        .await;

        let result = match outcome {
            Ok(report) => unit.commit().await.map(|()| report),
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed repair failed");
                }
                Err(err)
            }
        };

        // Atomic units drop every write on failure; non-atomic ones keep them.
        result.map_err(|error| RepairFailure {
            error,
            reputation_written: reputation_written && !atomic,
        })
    }

    /// Resolve every queued candidate. Failures are requeued for the next pass.
    pub async fn process_pending(&self) -> (usize, usize) {
        let mut resolved = 0;
        let mut requeued = 0;

        for mut candidate in self.sink.drain().await {
            match self.try_reconcile(&candidate).await {
                Ok(report) => {
                    info!(
                        target: "qna::reconcile",
                        user_id = %candidate.user_id,
                        target_id = %report.target_id,
                        reputation_applied = report.reputation_applied,
                        membership_rebuilt = report.membership_rebuilt,
                        "Reconciled partially applied vote"
                    );
                    resolved += 1;
                }
                Err(RepairFailure {
                    error: AppError::TargetNotFound(_),
                    ..
                }) if !candidate.reputation_pending() => {
                    // Target gone and author already settled; nothing left to fix.
                    resolved += 1;
                }
                Err(failure) => {
                    if failure.reputation_written {
                        candidate.completed_stages.push(VoteStage::AuthorReputation);
                    }
                    warn!(
                        target: "qna::reconcile",
                        target_id = %candidate.target_id,
                        error = %failure.error,
                        reputation_settled = !candidate.reputation_pending(),
                        "Reconciliation failed, will retry"
                    );
                    self.sink.requeue(candidate).await;
                    requeued += 1;
                }
            }
        }

        (resolved, requeued)
    }

    /// Check every target of both kinds, batch by batch.
    pub async fn sweep(&self) -> AppResult<(usize, usize)> {
        let mut examined = 0;
        let mut repaired = 0;

        for kind in [TargetKind::Question, TargetKind::Answer] {
            let mut after: Option<String> = None;
            loop {
                let ids = self
                    .store
                    .target_ids(kind, after.as_deref(), self.batch_size)
                    .await?;
                let Some(last) = ids.last().cloned() else {
                    break;
                };

                for id in &ids {
                    examined += 1;
                    match self.repair_target(kind, id).await {
                        Ok(report) if report.membership_rebuilt => {
                            warn!(
                                target: "qna::reconcile",
                                target_id = %id,
                                target_kind = %kind,
                                "Rebuilt drifted vote membership"
                            );
                            repaired += 1;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(target_id = %id, error = %err, "Consistency check failed");
                        }
                    }
                }

                if (ids.len() as u64) < self.batch_size {
                    break;
                }
                after = Some(last);
            }
        }

        Ok((examined, repaired))
    }

    /// One full pass: queued candidates first, then the sweep.
    pub async fn run_once(&self) -> AppResult<ScanSummary> {
        let (candidates_resolved, candidates_requeued) = self.process_pending().await;
        let (targets_examined, targets_repaired) = self.sweep().await?;

        let summary = ScanSummary {
            candidates_resolved,
            candidates_requeued,
            targets_examined,
            targets_repaired,
        };
        debug!(?summary, "Consistency scan finished");
        Ok(summary)
    }
}

/// Membership sets implied by a target's vote records, in record order.
fn membership_from_votes(votes: &[qna_db::entities::vote::Model]) -> (Vec<String>, Vec<String>) {
    let mut upvotes = Vec::new();
    let mut downvotes = Vec::new();
    for vote in votes {
        match vote.vote_value() {
            Some(VoteValue::Up) => upvotes.push(vote.user_id.clone()),
            Some(VoteValue::Down) => downvotes.push(vote.user_id.clone()),
            None => warn!(vote_id = %vote.id, value = vote.value, "Skipping vote with invalid value"),
        }
    }
    (upvotes, downvotes)
}

fn same_members(target: &VoteTarget, upvotes: &[String], downvotes: &[String]) -> bool {
    fn sorted(ids: &[String]) -> Vec<&str> {
        let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
    sorted(&target.upvotes) == sorted(upvotes) && sorted(&target.downvotes) == sorted(downvotes)
}
