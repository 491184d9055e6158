//! Core types for the consensus engine
//!
//! These types are persisted by the [`ConsensusStore`](crate::store::ConsensusStore)
//! and represent the audit trail of every classification: agents, the votes
//! they cast, the consensus reached, and every reputation change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for an agent in the pool
pub type AgentId = String;

/// Unique identifier for a classification instance
pub type ProblemId = String;

/// Binary classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Legitimate message (class 0)
    Ham,
    /// Unsolicited message (class 1)
    Spam,
}

impl Label {
    /// Numeric class used by the classifiers
    pub fn class(self) -> u8 {
        match self {
            Label::Ham => 0,
            Label::Spam => 1,
        }
    }

    /// Parse a numeric class, rejecting anything but 0 and 1
    pub fn from_class(class: u8) -> Option<Self> {
        match class {
            0 => Some(Label::Ham),
            1 => Some(Label::Spam),
            _ => None,
        }
    }

    /// The opposite label
    pub fn other(self) -> Self {
        match self {
            Label::Ham => Label::Spam,
            Label::Spam => Label::Ham,
        }
    }

    /// Both labels, ham first
    pub fn all() -> &'static [Label] {
        &[Label::Ham, Label::Spam]
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Ham => write!(f, "ham"),
            Label::Spam => write!(f, "spam"),
        }
    }
}

impl std::str::FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ham" | "0" => Ok(Label::Ham),
            "spam" | "1" => Ok(Label::Spam),
            other => Err(format!("unknown label: {other}")),
        }
    }
}

/// Which of the four reputation cases a resolved vote fell into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    /// Agent and consensus were both correct
    AgreedCorrect,
    /// Agent was wrong while the consensus was correct
    DissentedWrong,
    /// Agent was right while the consensus was wrong
    MinorityCorrect,
    /// Agent and consensus were both wrong
    BothWrong,
}

impl UpdateReason {
    /// Select the case from the two correctness facts
    pub fn classify(agent_correct: bool, consensus_correct: bool) -> Self {
        match (agent_correct, consensus_correct) {
            (true, true) => UpdateReason::AgreedCorrect,
            (false, true) => UpdateReason::DissentedWrong,
            (true, false) => UpdateReason::MinorityCorrect,
            (false, false) => UpdateReason::BothWrong,
        }
    }

    /// Whether the agent's own vote matched ground truth
    pub fn agent_correct(self) -> bool {
        matches!(
            self,
            UpdateReason::AgreedCorrect | UpdateReason::MinorityCorrect
        )
    }
}

impl std::fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateReason::AgreedCorrect => write!(f, "agreed_correct"),
            UpdateReason::DissentedWrong => write!(f, "dissented_wrong"),
            UpdateReason::MinorityCorrect => write!(f, "minority_correct"),
            UpdateReason::BothWrong => write!(f, "both_wrong"),
        }
    }
}

/// Reputation record for one classifier in the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable key
    pub agent_id: AgentId,

    /// Model family tag (informational only)
    pub model_kind: String,

    /// Current voting weight
    pub weight: f64,

    /// Votes resolved against ground truth
    pub total_votes: u64,

    /// Resolved votes that matched ground truth
    pub correct_votes: u64,

    /// Lifetime count of [`UpdateReason::AgreedCorrect`]
    pub agreed_correct: u64,

    /// Lifetime count of [`UpdateReason::DissentedWrong`]
    pub dissent_wrong: u64,

    /// Lifetime count of [`UpdateReason::MinorityCorrect`]
    pub minority_correct: u64,

    /// Lifetime count of [`UpdateReason::BothWrong`]
    pub both_wrong: u64,

    /// Sum of confidences over resolved votes
    pub confidence_sum: f64,

    /// When the agent was first registered
    pub registered_at: DateTime<Utc>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a fresh agent record with zeroed counters
    pub fn new(agent_id: impl Into<AgentId>, model_kind: impl Into<String>, weight: f64) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            model_kind: model_kind.into(),
            weight,
            total_votes: 0,
            correct_votes: 0,
            agreed_correct: 0,
            dissent_wrong: 0,
            minority_correct: 0,
            both_wrong: 0,
            confidence_sum: 0.0,
            registered_at: now,
            updated_at: now,
        }
    }

    /// `correct_votes / total_votes`, undefined before the first resolved vote
    pub fn accuracy(&self) -> Option<f64> {
        if self.total_votes == 0 {
            None
        } else {
            Some(self.correct_votes as f64 / self.total_votes as f64)
        }
    }

    /// Mean confidence over resolved votes
    pub fn average_confidence(&self) -> Option<f64> {
        if self.total_votes == 0 {
            None
        } else {
            Some(self.confidence_sum / self.total_votes as f64)
        }
    }

    /// Bump the lifetime counters for one resolved vote
    pub(crate) fn record(&mut self, reason: UpdateReason, confidence: f64) {
        self.total_votes += 1;
        if reason.agent_correct() {
            self.correct_votes += 1;
        }
        match reason {
            UpdateReason::AgreedCorrect => self.agreed_correct += 1,
            UpdateReason::DissentedWrong => self.dissent_wrong += 1,
            UpdateReason::MinorityCorrect => self.minority_correct += 1,
            UpdateReason::BothWrong => self.both_wrong += 1,
        }
        self.confidence_sum += confidence;
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One agent's opinion on one classification instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub problem_id: ProblemId,
    pub agent_id: AgentId,
    pub prediction: Label,
    /// Agent's own confidence in `[0, 1]`
    pub confidence: f64,
    /// Agent weight copied when the vote was cast
    pub weight_at_time: f64,
    /// Set once ground truth is known
    pub is_correct: Option<bool>,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Cast a new, unresolved vote
    pub fn new(
        problem_id: impl Into<ProblemId>,
        agent_id: impl Into<AgentId>,
        prediction: Label,
        confidence: f64,
        weight_at_time: f64,
    ) -> Self {
        Self {
            problem_id: problem_id.into(),
            agent_id: agent_id.into(),
            prediction,
            confidence,
            weight_at_time,
            is_correct: None,
            cast_at: Utc::now(),
        }
    }

    /// Contribution of this vote to its label's score
    pub fn weighted_score(&self) -> f64 {
        self.confidence * self.weight_at_time
    }

    /// Copy of this vote with correctness filled in against `truth`
    pub fn resolved(&self, truth: Label) -> Self {
        Self {
            is_correct: Some(self.prediction == truth),
            ..self.clone()
        }
    }
}

/// Categorical view of the consensus confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
}

impl ConfidenceLevel {
    /// Bucket a confidence; each threshold is inclusive on its lower bound
    pub fn from_confidence(confidence: f64, high: f64, moderate: f64) -> Self {
        if confidence >= high {
            ConfidenceLevel::High
        } else if confidence >= moderate {
            ConfidenceLevel::Moderate
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::High => write!(f, "high"),
            ConfidenceLevel::Moderate => write!(f, "moderate"),
            ConfidenceLevel::Low => write!(f, "low"),
        }
    }
}

/// Unweighted head count per label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDistribution {
    pub spam: usize,
    pub ham: usize,
}

impl VoteDistribution {
    /// Count the votes for each label
    pub fn from_votes(votes: &[Vote]) -> Self {
        votes.iter().fold(Self::default(), |mut dist, vote| {
            match vote.prediction {
                Label::Spam => dist.spam += 1,
                Label::Ham => dist.ham += 1,
            }
            dist
        })
    }

    pub fn count(&self, label: Label) -> usize {
        match label {
            Label::Spam => self.spam,
            Label::Ham => self.ham,
        }
    }

    pub fn total(&self) -> usize {
        self.spam + self.ham
    }

    /// Human-readable split with the decision's count first, e.g. `"3-1"`
    pub fn summary(&self, decision: Label) -> String {
        format!("{}-{}", self.count(decision), self.count(decision.other()))
    }
}

/// Rule that settled a tied weighted score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// More raw votes for the winning label
    VoteCount,
    /// Counts also tied; fell back to ham
    SafeDefault,
}

/// The engine's output for one classification instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub problem_id: ProblemId,
    pub decision: Label,
    /// `score(decision) / (score(spam) + score(ham))`
    pub confidence: f64,
    pub votes: Vec<Vote>,
    pub vote_distribution: VoteDistribution,
    pub confidence_level: ConfidenceLevel,
    /// Weighted score for spam
    pub spam_score: f64,
    /// Weighted score for ham
    pub ham_score: f64,
    /// Set when the weighted scores tied
    pub tie_break: Option<TieBreak>,
    pub decided_at: DateTime<Utc>,
}

impl ConsensusResult {
    /// Weighted score for a label
    pub fn score(&self, label: Label) -> f64 {
        match label {
            Label::Spam => self.spam_score,
            Label::Ham => self.ham_score,
        }
    }

    /// Whether the decision matches a ground-truth label
    pub fn is_correct(&self, truth: Label) -> bool {
        self.decision == truth
    }

    /// One-line explanation suitable for logs and API responses
    pub fn explanation(&self) -> String {
        let mut text = format!(
            "{} with {:.1}% confidence ({}), votes {}",
            self.decision,
            self.confidence * 100.0,
            self.confidence_level,
            self.vote_distribution.summary(self.decision),
        );
        match self.tie_break {
            Some(TieBreak::VoteCount) => text.push_str(", weighted tie broken by vote count"),
            Some(TieBreak::SafeDefault) => text.push_str(", full tie defaulted to ham"),
            None => {}
        }
        text
    }
}

/// Audit record of a single reputation change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightUpdateEvent {
    pub agent_id: AgentId,
    pub previous_weight: f64,
    pub new_weight: f64,
    pub reason: UpdateReason,
    pub problem_id: ProblemId,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of one classification instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPhase {
    /// Agents are being queried
    Collecting,
    /// Consensus reached, ground truth not yet applied
    Aggregated,
    /// Ground truth applied to agent reputations
    ReputationUpdated,
    /// Closed without ground truth
    ReputationSkipped,
}

impl ClassificationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClassificationPhase::ReputationUpdated | ClassificationPhase::ReputationSkipped
        )
    }

    /// Forward-only transitions
    pub fn can_transition_to(self, next: ClassificationPhase) -> bool {
        use ClassificationPhase::*;
        matches!(
            (self, next),
            (Collecting, Aggregated)
                | (Aggregated, ReputationUpdated)
                | (Aggregated, ReputationSkipped)
        )
    }
}

impl std::fmt::Display for ClassificationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationPhase::Collecting => write!(f, "collecting"),
            ClassificationPhase::Aggregated => write!(f, "aggregated"),
            ClassificationPhase::ReputationUpdated => write!(f, "reputation_updated"),
            ClassificationPhase::ReputationSkipped => write!(f, "reputation_skipped"),
        }
    }
}

/// An agent that did not contribute a vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abstention {
    pub agent_id: AgentId,
    pub reason: String,
    pub timed_out: bool,
}

/// Persisted state of one classification instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub result: ConsensusResult,
    pub phase: ClassificationPhase,
    pub ground_truth: Option<Label>,
    pub abstentions: Vec<Abstention>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ProblemRecord {
    /// Record for a freshly aggregated problem
    pub fn aggregated(result: ConsensusResult, abstentions: Vec<Abstention>) -> Self {
        Self {
            result,
            phase: ClassificationPhase::Aggregated,
            ground_truth: None,
            abstentions,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn problem_id(&self) -> &str {
        &self.result.problem_id
    }

    /// Correctness of the consensus, derived once ground truth is known
    pub fn is_correct(&self) -> Option<bool> {
        self.ground_truth.map(|truth| self.result.is_correct(truth))
    }
}
