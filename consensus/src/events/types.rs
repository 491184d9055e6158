//! Event types published while classifying and updating reputations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, ConfidenceLevel, Label, ProblemId, UpdateReason};

/// All consensus engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusEvent {
    /// Fan-out finished for a problem
    VotesCollected {
        problem_id: ProblemId,
        voters: Vec<AgentId>,
        abstained: usize,
        timestamp: DateTime<Utc>,
    },

    /// An agent failed or timed out and was left out of the vote
    AgentAbstained {
        problem_id: ProblemId,
        agent_id: AgentId,
        timed_out: bool,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The aggregator produced a decision
    ConsensusReached {
        problem_id: ProblemId,
        decision: Label,
        confidence: f64,
        confidence_level: ConfidenceLevel,
        distribution: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent's weight changed after ground truth was applied
    WeightUpdated {
        problem_id: ProblemId,
        agent_id: AgentId,
        previous_weight: f64,
        new_weight: f64,
        reason: UpdateReason,
        timestamp: DateTime<Utc>,
    },

    /// A problem was closed without ground truth
    ReputationSkipped {
        problem_id: ProblemId,
        timestamp: DateTime<Utc>,
    },

    /// An operator reset every weight
    WeightsReset {
        agents: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ConsensusEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ConsensusEvent::VotesCollected { timestamp, .. } => *timestamp,
            ConsensusEvent::AgentAbstained { timestamp, .. } => *timestamp,
            ConsensusEvent::ConsensusReached { timestamp, .. } => *timestamp,
            ConsensusEvent::WeightUpdated { timestamp, .. } => *timestamp,
            ConsensusEvent::ReputationSkipped { timestamp, .. } => *timestamp,
            ConsensusEvent::WeightsReset { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ConsensusEvent::VotesCollected { .. } => "votes_collected",
            ConsensusEvent::AgentAbstained { .. } => "agent_abstained",
            ConsensusEvent::ConsensusReached { .. } => "consensus_reached",
            ConsensusEvent::WeightUpdated { .. } => "weight_updated",
            ConsensusEvent::ReputationSkipped { .. } => "reputation_skipped",
            ConsensusEvent::WeightsReset { .. } => "weights_reset",
        }
    }

    /// Problem this event refers to, if any
    pub fn problem_id(&self) -> Option<&str> {
        match self {
            ConsensusEvent::VotesCollected { problem_id, .. }
            | ConsensusEvent::AgentAbstained { problem_id, .. }
            | ConsensusEvent::ConsensusReached { problem_id, .. }
            | ConsensusEvent::WeightUpdated { problem_id, .. }
            | ConsensusEvent::ReputationSkipped { problem_id, .. } => Some(problem_id),
            ConsensusEvent::WeightsReset { .. } => None,
        }
    }

    /// Agent this event refers to, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            ConsensusEvent::AgentAbstained { agent_id, .. }
            | ConsensusEvent::WeightUpdated { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_type_tag() {
        let event = ConsensusEvent::ReputationSkipped {
            problem_id: "p1".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reputation_skipped");
        assert_eq!(event.problem_id(), Some("p1"));
        assert_eq!(event.agent_id(), None);
    }
}
