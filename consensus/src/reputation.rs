//! Reputation manager - turns ground truth into weight changes
//!
//! For every resolved vote exactly one of four cases applies, chosen from
//! whether the agent and the consensus each matched the truth:
//!
//! | agent | consensus | multiplier |
//! |---|---|---|
//! | correct | correct | `reward_correct` |
//! | wrong | correct | `penalty_wrong` |
//! | correct | wrong | `reward_minority` |
//! | wrong | wrong | `penalty_minority` |
//!
//! A round is all or nothing: the affected agents stay locked while the new
//! weights, their events and (for stored problems) the phase change are
//! committed in one store write. Updates are synchronous; callers that
//! `.await` must finish awaiting before calling in.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{ConsensusEvent, SharedEventBus};
use crate::registry::{OutcomeUpdate, RegistryError, SharedAgentRegistry};
use crate::store::{ReputationRound, SharedStore, StoreError};
use crate::types::{ConsensusResult, Label, UpdateReason, Vote, WeightUpdateEvent};

/// Error type for reputation updates
#[derive(Debug, thiserror::Error)]
pub enum ReputationError {
    #[error("Vote from unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Vote for problem {found} does not belong to consensus {expected}")]
    ProblemMismatch { expected: String, found: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for reputation updates
pub type ReputationResult<T> = Result<T, ReputationError>;

/// Shared reference to ReputationManager
pub type SharedReputationManager = Arc<ReputationManager>;

/// What a call to [`ReputationManager::update`] did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReputationOutcome {
    /// No ground truth; nothing changed
    Skipped,
    /// One event per vote, in vote order
    Updated {
        events: Vec<WeightUpdateEvent>,
        resolved_votes: Vec<Vote>,
    },
}

impl ReputationOutcome {
    pub fn events(&self) -> &[WeightUpdateEvent] {
        match self {
            ReputationOutcome::Skipped => &[],
            ReputationOutcome::Updated { events, .. } => events,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ReputationOutcome::Skipped)
    }
}

/// Applies the four-case update matrix through the agent registry
pub struct ReputationManager {
    registry: SharedAgentRegistry,
    store: SharedStore,
    event_bus: SharedEventBus,
}

impl ReputationManager {
    pub fn new(
        registry: SharedAgentRegistry,
        store: SharedStore,
        event_bus: SharedEventBus,
    ) -> Self {
        Self {
            registry,
            store,
            event_bus,
        }
    }

    /// Create a shared reference to this manager
    pub fn shared(self) -> SharedReputationManager {
        Arc::new(self)
    }

    /// Apply ground truth to every agent that voted on `consensus`
    ///
    /// Without ground truth this is a no-op. With it, every vote is validated
    /// before any weight is touched, and the new weights and their events are
    /// committed to the store in one write. The votes themselves need not be
    /// persisted; see [`ReputationManager::resolve`] for stored problems.
    pub fn update(
        &self,
        votes: &[Vote],
        consensus: &ConsensusResult,
        ground_truth: Option<Label>,
    ) -> ReputationResult<ReputationOutcome> {
        let Some(truth) = ground_truth else {
            debug!(problem_id = %consensus.problem_id, "No ground truth, reputation unchanged");
            return Ok(ReputationOutcome::Skipped);
        };
        self.apply(votes, consensus, truth, false)
    }

    /// Apply ground truth to a persisted problem
    ///
    /// Same as [`ReputationManager::update`], but the same store write also
    /// moves the problem to `ReputationUpdated` and records each vote's
    /// correctness. A problem that was already resolved fails the write and
    /// nothing changes.
    pub fn resolve(
        &self,
        consensus: &ConsensusResult,
        truth: Label,
    ) -> ReputationResult<ReputationOutcome> {
        self.apply(&consensus.votes, consensus, truth, true)
    }

    /// Check that every vote belongs to `consensus` and comes from a known agent
    pub fn validate(&self, votes: &[Vote], consensus: &ConsensusResult) -> ReputationResult<()> {
        for vote in votes {
            if vote.problem_id != consensus.problem_id {
                return Err(ReputationError::ProblemMismatch {
                    expected: consensus.problem_id.clone(),
                    found: vote.problem_id.clone(),
                });
            }
            if !self.registry.contains(&vote.agent_id)? {
                return Err(ReputationError::UnknownAgent(vote.agent_id.clone()));
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        votes: &[Vote],
        consensus: &ConsensusResult,
        truth: Label,
        claim: bool,
    ) -> ReputationResult<ReputationOutcome> {
        self.validate(votes, consensus)?;

        let consensus_correct = consensus.is_correct(truth);
        let config = self.registry.config();
        let resolved_votes: Vec<Vote> = votes.iter().map(|vote| vote.resolved(truth)).collect();
        let updates: Vec<OutcomeUpdate> = resolved_votes
            .iter()
            .map(|vote| {
                let reason =
                    UpdateReason::classify(vote.is_correct == Some(true), consensus_correct);
                OutcomeUpdate {
                    agent_id: vote.agent_id.clone(),
                    reason,
                    multiplier: config.multiplier_for(reason),
                    confidence: vote.confidence,
                }
            })
            .collect();

        let timestamp = Utc::now();
        let (_, events) = self.registry.record_outcomes(
            &updates,
            |staged| -> ReputationResult<Vec<WeightUpdateEvent>> {
                let events: Vec<WeightUpdateEvent> = staged
                    .iter()
                    .map(|outcome| WeightUpdateEvent {
                        agent_id: outcome.agent.agent_id.clone(),
                        previous_weight: outcome.change.previous_weight,
                        new_weight: outcome.change.new_weight,
                        reason: outcome.reason,
                        problem_id: consensus.problem_id.clone(),
                        timestamp,
                    })
                    .collect();

                let outcomes = if claim {
                    resolved_votes
                        .iter()
                        .map(|vote| (vote.agent_id.clone(), vote.is_correct == Some(true)))
                        .collect()
                } else {
                    Vec::new()
                };

                self.store.commit_round(&ReputationRound {
                    problem_id: consensus.problem_id.clone(),
                    ground_truth: truth,
                    agents: staged.iter().map(|outcome| outcome.agent.clone()).collect(),
                    events: events.clone(),
                    outcomes,
                    claim,
                })?;
                Ok(events)
            },
        )?;

        for event in &events {
            self.event_bus.publish(ConsensusEvent::WeightUpdated {
                problem_id: event.problem_id.clone(),
                agent_id: event.agent_id.clone(),
                previous_weight: event.previous_weight,
                new_weight: event.new_weight,
                reason: event.reason,
                timestamp: event.timestamp,
            });
            debug!(
                agent_id = %event.agent_id,
                reason = %event.reason,
                previous_weight = event.previous_weight,
                new_weight = event.new_weight,
                "Reputation applied"
            );
        }

        info!(
            problem_id = %consensus.problem_id,
            truth = %truth,
            consensus_correct,
            updates = events.len(),
            "Reputation updated"
        );

        Ok(ReputationOutcome::Updated {
            events,
            resolved_votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::config::ConsensusConfig;
    use crate::events::EventBus;
    use crate::registry::AgentRegistry;
    use crate::store::{ConsensusStore, MemoryStore};
    use crate::types::{ClassificationPhase, ProblemRecord};

    struct Fixture {
        registry: SharedAgentRegistry,
        store: SharedStore,
        manager: ReputationManager,
    }

    fn test_setup(agents: &[&str]) -> Fixture {
        let store = MemoryStore::new().shared();
        let registry = AgentRegistry::new(store.clone(), ConsensusConfig::default())
            .unwrap()
            .shared();
        for id in agents {
            registry.register(id, "test").unwrap();
        }
        let manager =
            ReputationManager::new(registry.clone(), store.clone(), EventBus::new().shared());
        Fixture {
            registry,
            store,
            manager,
        }
    }

    fn weight(f: &Fixture, id: &str) -> f64 {
        f.registry.get_weight(id).unwrap()
    }

    #[test]
    fn test_consensus_correct_one_dissenter() {
        let f = test_setup(&["nb", "svm", "rf", "lr"]);
        let votes = vec![
            Vote::new("p1", "nb", Label::Spam, 0.92, 1.0),
            Vote::new("p1", "svm", Label::Spam, 0.88, 1.0),
            Vote::new("p1", "rf", Label::Spam, 0.75, 1.0),
            Vote::new("p1", "lr", Label::Ham, 0.42, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();

        let outcome = f
            .manager
            .update(&votes, &consensus, Some(Label::Spam))
            .unwrap();

        for id in ["nb", "svm", "rf"] {
            assert!((weight(&f, id) - 1.05).abs() < 1e-12);
        }
        assert!((weight(&f, "lr") - 0.90).abs() < 1e-12);

        let lr = f.registry.get("lr").unwrap();
        assert_eq!(lr.total_votes, 1);
        assert_eq!(lr.correct_votes, 0);
        assert_eq!(lr.dissent_wrong, 1);

        assert_eq!(outcome.events().len(), 4);
        assert_eq!(f.store.weight_events(None).unwrap().len(), 4);
        match outcome {
            ReputationOutcome::Updated { resolved_votes, .. } => {
                assert_eq!(resolved_votes[3].is_correct, Some(false));
                assert_eq!(resolved_votes[0].is_correct, Some(true));
            }
            ReputationOutcome::Skipped => panic!("expected an update"),
        }
    }

    #[test]
    fn test_consensus_wrong_minority_rewarded() {
        let f = test_setup(&["nb", "svm", "rf", "lr"]);
        let votes = vec![
            Vote::new("p2", "nb", Label::Spam, 0.9, 1.0),
            Vote::new("p2", "svm", Label::Spam, 0.9, 1.0),
            Vote::new("p2", "rf", Label::Spam, 0.9, 1.0),
            Vote::new("p2", "lr", Label::Ham, 0.6, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();
        assert_eq!(consensus.decision, Label::Spam);

        f.manager
            .update(&votes, &consensus, Some(Label::Ham))
            .unwrap();

        for id in ["nb", "svm", "rf"] {
            assert!((weight(&f, id) - 0.85).abs() < 1e-12);
        }
        assert!((weight(&f, "lr") - 1.15).abs() < 1e-12);

        let events = f.store.weight_events(Some("lr")).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, UpdateReason::MinorityCorrect);
    }

    #[test]
    fn test_no_ground_truth_is_noop() {
        let f = test_setup(&["nb", "svm"]);
        let votes = vec![
            Vote::new("p3", "nb", Label::Spam, 0.9, 1.0),
            Vote::new("p3", "svm", Label::Ham, 0.9, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();

        let outcome = f.manager.update(&votes, &consensus, None).unwrap();

        assert!(outcome.is_skipped());
        assert_eq!(weight(&f, "nb"), 1.0);
        assert_eq!(f.registry.get("svm").unwrap().total_votes, 0);
        assert!(f.store.weight_events(None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_agent_rejected_before_any_write() {
        let f = test_setup(&["nb"]);
        let votes = vec![
            Vote::new("p4", "nb", Label::Spam, 0.9, 1.0),
            Vote::new("p4", "ghost", Label::Spam, 0.9, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();

        let result = f.manager.update(&votes, &consensus, Some(Label::Spam));

        assert!(matches!(result, Err(ReputationError::UnknownAgent(id)) if id == "ghost"));
        assert_eq!(weight(&f, "nb"), 1.0);
        assert!(f.store.weight_events(None).unwrap().is_empty());
    }

    #[test]
    fn test_problem_mismatch_rejected() {
        let f = test_setup(&["nb"]);
        let votes = vec![Vote::new("p5", "nb", Label::Spam, 0.9, 1.0)];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();
        let stray = vec![Vote::new("p6", "nb", Label::Spam, 0.9, 1.0)];

        assert!(matches!(
            f.manager.update(&stray, &consensus, Some(Label::Spam)),
            Err(ReputationError::ProblemMismatch { .. })
        ));
    }

    #[test]
    fn test_events_published_on_bus() {
        let store = MemoryStore::new().shared();
        let registry = AgentRegistry::new(store.clone(), ConsensusConfig::default())
            .unwrap()
            .shared();
        registry.register("nb", "naive_bayes").unwrap();
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let manager = ReputationManager::new(registry, store, bus);

        let votes = vec![Vote::new("p7", "nb", Label::Ham, 0.7, 1.0)];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();
        manager.update(&votes, &consensus, Some(Label::Ham)).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type(), "weight_updated");
        assert_eq!(event.agent_id(), Some("nb"));
    }

    fn persist(store: &SharedStore, consensus: &ConsensusResult) {
        for vote in &consensus.votes {
            store.insert_vote(vote).unwrap();
        }
        store
            .insert_problem(&ProblemRecord::aggregated(consensus.clone(), Vec::new()))
            .unwrap();
    }

    #[test]
    fn test_resolve_claims_problem_once() {
        let f = test_setup(&["nb", "lr"]);
        let votes = vec![
            Vote::new("p8", "nb", Label::Spam, 0.9, 1.0),
            Vote::new("p8", "lr", Label::Ham, 0.4, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();
        persist(&f.store, &consensus);

        let outcome = f.manager.resolve(&consensus, Label::Spam).unwrap();
        assert_eq!(outcome.events().len(), 2);

        let record = f.store.get_problem("p8").unwrap().unwrap();
        assert_eq!(record.phase, ClassificationPhase::ReputationUpdated);
        assert_eq!(record.ground_truth, Some(Label::Spam));
        let stored = f.store.votes_for("p8").unwrap();
        assert!(stored.iter().all(|v| v.is_correct.is_some()));

        let again = f.manager.resolve(&consensus, Label::Spam);
        assert!(matches!(
            again,
            Err(ReputationError::Store(StoreError::InvalidTransition { .. }))
        ));
        assert!((weight(&f, "nb") - 1.05).abs() < 1e-12);
        assert_eq!(f.registry.get("nb").unwrap().total_votes, 1);
        assert_eq!(f.store.weight_events(None).unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_unpersisted_problem_changes_nothing() {
        let f = test_setup(&["nb"]);
        let votes = vec![Vote::new("p9", "nb", Label::Spam, 0.9, 1.0)];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();

        let result = f.manager.resolve(&consensus, Label::Spam);

        assert!(matches!(
            result,
            Err(ReputationError::Store(StoreError::NotFound(_)))
        ));
        assert_eq!(weight(&f, "nb"), 1.0);
        assert_eq!(f.registry.get("nb").unwrap().total_votes, 0);
        assert!(f.store.weight_events(None).unwrap().is_empty());
    }
}
