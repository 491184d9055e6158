//! Reputation-weighted aggregation of votes into one decision
//!
//! Each label scores `Σ confidence × weight_at_time` over the votes predicting
//! it. The larger score wins; near-equal scores fall back to the raw vote
//! count and then to ham, so the same votes always yield the same decision.

use chrono::Utc;
use tracing::debug;

use crate::config::ConsensusConfig;
use crate::types::{ConfidenceLevel, ConsensusResult, Label, TieBreak, Vote, VoteDistribution};

/// Scores closer than this are treated as a tie
pub const SCORE_EPSILON: f64 = 1e-9;

/// Error type for aggregation
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("No votes to aggregate")]
    EmptyVoteSet,

    #[error("Votes span multiple problems: expected {expected}, found {found}")]
    MixedProblems { expected: String, found: String },
}

/// Result type for aggregation
pub type AggregationResult<T> = Result<T, AggregationError>;

/// Stateless aggregator; only the confidence thresholds are configurable
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    high_confidence: f64,
    moderate_confidence: f64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(&ConsensusConfig::default())
    }
}

impl Aggregator {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            high_confidence: config.high_confidence,
            moderate_confidence: config.moderate_confidence,
        }
    }

    /// Combine the votes of one problem into a [`ConsensusResult`]
    pub fn aggregate(&self, votes: &[Vote]) -> AggregationResult<ConsensusResult> {
        let first = votes.first().ok_or(AggregationError::EmptyVoteSet)?;
        let problem_id = first.problem_id.clone();

        if let Some(stray) = votes.iter().find(|v| v.problem_id != problem_id) {
            return Err(AggregationError::MixedProblems {
                expected: problem_id,
                found: stray.problem_id.clone(),
            });
        }

        let (spam_score, ham_score) =
            votes
                .iter()
                .fold((0.0, 0.0), |(spam, ham), vote| match vote.prediction {
                    Label::Spam => (spam + vote.weighted_score(), ham),
                    Label::Ham => (spam, ham + vote.weighted_score()),
                });
        let distribution = VoteDistribution::from_votes(votes);

        let (decision, tie_break) = Self::decide(spam_score, ham_score, &distribution);

        let total = spam_score + ham_score;
        let winning = match decision {
            Label::Spam => spam_score,
            Label::Ham => ham_score,
        };
        let confidence = if total > 0.0 { winning / total } else { 0.0 };

        let confidence_level = ConfidenceLevel::from_confidence(
            confidence,
            self.high_confidence,
            self.moderate_confidence,
        );

        debug!(
            problem_id = %problem_id,
            spam_score,
            ham_score,
            decision = %decision,
            confidence,
            tie_break = ?tie_break,
            "Votes aggregated"
        );

        Ok(ConsensusResult {
            problem_id,
            decision,
            confidence,
            votes: votes.to_vec(),
            vote_distribution: distribution,
            confidence_level,
            spam_score,
            ham_score,
            tie_break,
            decided_at: Utc::now(),
        })
    }

    fn decide(
        spam_score: f64,
        ham_score: f64,
        distribution: &VoteDistribution,
    ) -> (Label, Option<TieBreak>) {
        if (spam_score - ham_score).abs() > SCORE_EPSILON {
            let decision = if spam_score > ham_score {
                Label::Spam
            } else {
                Label::Ham
            };
            return (decision, None);
        }

        match distribution.spam.cmp(&distribution.ham) {
            std::cmp::Ordering::Greater => (Label::Spam, Some(TieBreak::VoteCount)),
            std::cmp::Ordering::Less => (Label::Ham, Some(TieBreak::VoteCount)),
            std::cmp::Ordering::Equal => (Label::Ham, Some(TieBreak::SafeDefault)),
        }
    }
}
