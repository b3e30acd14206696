//! Matching engine: candidate search, scoring, routing and the transactional
//! writes that follow a decision.

pub mod atomic;
pub mod audit;
pub mod batch;
pub mod candidates;
pub mod committer;
pub mod error;
pub mod reassign;
pub mod router;
pub mod scoring;
pub mod service;

pub use batch::{BatchSelection, BatchSummary};
pub use candidates::{CandidateFinder, CandidateWindow};
pub use committer::{CommittedMatch, TransactionalCommitter};
pub use error::{ErrorKind, MatchError};
pub use reassign::{ReassignRequest, ReassignResult, ReassignmentWorkflow};
pub use router::{ConfigValidationError, MatchRouter, RouteOutcome, Thresholds};
pub use scoring::{ConfidenceBreakdown, ConfidenceScorer, MatchFlags, MAX_SCORE};
pub use service::{MatchResult, MatchingEngine, Suggestion, SYSTEM_ACTOR};
