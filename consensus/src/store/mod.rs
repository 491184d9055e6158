//! Persistence for the consensus audit trail
//!
//! The engine depends on the [`ConsensusStore`] trait only. Two backends are
//! provided:
//!
//! - [`MemoryStore`]: process-local, always available, used by tests and the
//!   bench CLI
//! - `RocksStore` (feature `persistent`): RocksDB column families
//!
//! Every backend enforces the same invariants:
//!
//! - at most one vote per `(problem_id, agent_id)`
//! - votes and weight events are append-only; a vote's correctness is
//!   written once
//! - one [`ProblemRecord`] per problem, moving forward through
//!   [`ClassificationPhase`] only
//! - a [`ReputationRound`] is committed whole or not at all
//!
//! # Usage
//!
//! ```ignore
//! use consensus::store::{MemoryStore, ConsensusStore};
//!
//! let store = MemoryStore::new().shared();
//! store.insert_vote(&vote)?;
//! let votes = store.votes_for(&vote.problem_id)?;
//! ```

pub mod memory;
#[cfg(feature = "persistent")]
pub mod rocks;
pub mod schema;

use std::sync::Arc;

use crate::types::{
    Agent, AgentId, ClassificationPhase, Label, ProblemId, ProblemRecord, Vote,
    WeightUpdateEvent,
};

pub use memory::MemoryStore;
#[cfg(feature = "persistent")]
pub use rocks::RocksStore;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate vote from agent {agent_id} on problem {problem_id}")]
    DuplicateVote {
        problem_id: String,
        agent_id: String,
    },

    #[error("Problem already recorded: {0}")]
    DuplicateProblem(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Outcome already set for agent {agent_id} on problem {problem_id}")]
    OutcomeAlreadySet {
        problem_id: String,
        agent_id: String,
    },

    #[error("Invalid phase transition for {problem_id}: {from} -> {to}")]
    InvalidTransition {
        problem_id: String,
        from: ClassificationPhase,
        to: ClassificationPhase,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[cfg(feature = "persistent")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared, type-erased store handle
pub type SharedStore = Arc<dyn ConsensusStore>;

/// Every write produced by applying ground truth to one problem
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationRound {
    pub problem_id: ProblemId,
    pub ground_truth: Label,
    /// Agent rows after the update
    pub agents: Vec<Agent>,
    /// One event per agent, in vote order
    pub events: Vec<WeightUpdateEvent>,
    /// `(agent_id, is_correct)` for persisted votes; empty for detached rounds
    pub outcomes: Vec<(AgentId, bool)>,
    /// Move the problem to `ReputationUpdated` in the same write
    pub claim: bool,
}

/// Durable record keeping for agents, votes, problems and weight events
pub trait ConsensusStore: Send + Sync {
    /// Insert or overwrite an agent row
    fn put_agent(&self, agent: &Agent) -> StoreResult<()>;

    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>>;

    /// All agents in registration order
    fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    /// Append a vote; fails with [`StoreError::DuplicateVote`] if the pair exists
    fn insert_vote(&self, vote: &Vote) -> StoreResult<()>;

    /// Record a vote's correctness; fails if it was already recorded
    fn resolve_vote(&self, problem_id: &str, agent_id: &str, is_correct: bool)
        -> StoreResult<()>;

    /// Votes cast on a problem, oldest first
    fn votes_for(&self, problem_id: &str) -> StoreResult<Vec<Vote>>;

    /// Insert a new problem; fails with [`StoreError::DuplicateProblem`] if it exists
    fn insert_problem(&self, record: &ProblemRecord) -> StoreResult<()>;

    fn get_problem(&self, problem_id: &str) -> StoreResult<Option<ProblemRecord>>;

    /// Atomically move a problem to `next`, recording ground truth if given
    fn transition_problem(
        &self,
        problem_id: &str,
        next: ClassificationPhase,
        ground_truth: Option<Label>,
    ) -> StoreResult<ProblemRecord>;

    /// Most recent problems, newest first
    fn recent_problems(&self, limit: usize) -> StoreResult<Vec<ProblemRecord>>;

    /// Append a weight update event
    fn append_weight_event(&self, event: &WeightUpdateEvent) -> StoreResult<()>;

    /// Weight update events in chronological order, optionally for one agent
    fn weight_events(&self, agent_id: Option<&str>) -> StoreResult<Vec<WeightUpdateEvent>>;

    /// Atomically write a reputation round
    ///
    /// All checks (phase transition, unresolved votes) run before anything is
    /// written; on error the store is unchanged.
    fn commit_round(&self, round: &ReputationRound) -> StoreResult<()>;
}

/// Apply a phase transition to a record in place
pub(crate) fn apply_transition(
    record: &mut ProblemRecord,
    next: ClassificationPhase,
    ground_truth: Option<Label>,
) -> StoreResult<()> {
    if !record.phase.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            problem_id: record.problem_id().to_string(),
            from: record.phase,
            to: next,
        });
    }
    record.phase = next;
    if ground_truth.is_some() {
        record.ground_truth = ground_truth;
    }
    if next.is_terminal() {
        record.resolved_at = Some(chrono::Utc::now());
    }
    Ok(())
}
