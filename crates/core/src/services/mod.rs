//! Business logic services.

#![allow(missing_docs)]

pub mod comment;
pub mod question;
pub mod reconciliation;
pub mod reputation;
pub mod target_lock;
pub mod user;
pub mod vote;
pub mod vote_store;

pub use comment::{CommentService, CreateCommentInput};
pub use question::{CreateAnswerInput, CreateQuestionInput, QuestionService};
pub use reconciliation::{
    ConsistencyScanner, LoggingReconciliationSink, ReconciliationCandidate, ReconciliationSink,
    RepairReport, ScanSummary, VoteStage,
};
pub use reputation::ReputationRules;
pub use target_lock::{TargetLockGuard, TargetLocks};
pub use user::{CreateUserInput, UserService};
pub use vote::{CastVoteInput, VoteOutcome, VoteService, VoteState, parse_target_kind, parse_vote_value};
pub use vote_store::{DbVoteStore, FaultPoint, MemoryVoteStore, VoteStore, VoteTarget, VoteUnit};
