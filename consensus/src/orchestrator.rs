//! Consensus orchestrator - sequences one classification end to end
//!
//! For each request the orchestrator fans `predict` out to every classifier
//! concurrently (each under its own timeout), snapshots the weights of the
//! agents that answered, aggregates and persists. When the true label is
//! known it also applies reputation updates. Late ground truth arrives through
//! [`ConsensusOrchestrator::submit_feedback`].
//!
//! All awaiting happens while collecting votes. Everything after that is
//! synchronous, so a dropped `classify` future either left no trace or
//! finished its bookkeeping.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agents::{AgentError, FeatureVector, Prediction, SharedClassifier};
use crate::aggregator::{AggregationError, Aggregator};
use crate::config::{ConfigError, ConsensusConfig};
use crate::events::{ConsensusEvent, SharedEventBus};
use crate::registry::{AgentRegistry, RegistryError, SharedAgentRegistry};
use crate::reputation::{ReputationError, ReputationManager, ReputationOutcome};
use crate::stats::{AgentStats, ConfidenceStats, ExperimentReport, LabeledSample};
use crate::store::{SharedStore, StoreError};
use crate::types::{
    Abstention, AgentId, ClassificationPhase, ConsensusResult, Label, ProblemId, ProblemRecord,
    Vote, WeightUpdateEvent,
};

/// Error type for orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No agent produced a vote for problem {0}")]
    NoAgentsAvailable(String),

    #[error("Problem already exists: {0}")]
    DuplicateProblem(String),

    #[error("Problem not found: {0}")]
    ProblemNotFound(String),

    #[error("Problem {problem_id} already resolved ({phase})")]
    AlreadyResolved {
        problem_id: String,
        phase: ClassificationPhase,
    },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Reputation error: {0}")]
    Reputation(#[from] ReputationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Shared reference to ConsensusOrchestrator
pub type SharedOrchestrator = Arc<ConsensusOrchestrator>;

/// Everything a caller learns from one classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyOutcome {
    pub result: ConsensusResult,
    pub abstentions: Vec<Abstention>,
    pub phase: ClassificationPhase,
    /// Empty unless the true label was supplied with the request
    pub weight_updates: Vec<WeightUpdateEvent>,
}

impl ClassifyOutcome {
    pub fn problem_id(&self) -> &str {
        &self.result.problem_id
    }

    pub fn decision(&self) -> Label {
        self.result.decision
    }
}

/// Result of applying late ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub problem_id: ProblemId,
    pub ground_truth: Label,
    pub consensus_correct: bool,
    pub weight_updates: Vec<WeightUpdateEvent>,
}

/// Coordinates classifiers, aggregation, persistence and reputation
pub struct ConsensusOrchestrator {
    config: ConsensusConfig,
    store: SharedStore,
    event_bus: SharedEventBus,
    registry: SharedAgentRegistry,
    aggregator: Aggregator,
    reputation: ReputationManager,
    /// Registration order; also the order of votes in every result
    classifiers: RwLock<Vec<SharedClassifier>>,
}

impl ConsensusOrchestrator {
    /// Create an orchestrator, restoring any agents already in `store`
    pub fn new(
        config: ConsensusConfig,
        store: SharedStore,
        event_bus: SharedEventBus,
    ) -> OrchestratorResult<Self> {
        config.validate()?;

        let registry = AgentRegistry::load(store.clone(), config.clone())?.shared();
        let reputation = ReputationManager::new(registry.clone(), store.clone(), event_bus.clone());
        let aggregator = Aggregator::new(&config);

        Ok(Self {
            config,
            store,
            event_bus,
            registry,
            aggregator,
            reputation,
            classifiers: RwLock::new(Vec::new()),
        })
    }

    /// Create a shared reference to this orchestrator
    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(self)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedAgentRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // =========================================================================
    // Agent pool
    // =========================================================================

    /// Add a classifier to the pool and register its reputation record
    ///
    /// Returns `false` if a classifier with the same id was already attached.
    pub fn add_classifier(&self, classifier: SharedClassifier) -> OrchestratorResult<bool> {
        let mut classifiers = self
            .classifiers
            .write()
            .map_err(|_| OrchestratorError::LockPoisoned)?;

        if classifiers
            .iter()
            .any(|c| c.agent_id() == classifier.agent_id())
        {
            return Ok(false);
        }

        self.registry
            .register(classifier.agent_id(), classifier.model_kind())?;
        classifiers.push(classifier);
        Ok(true)
    }

    pub fn classifier_count(&self) -> usize {
        self.classifiers.read().map(|c| c.len()).unwrap_or(0)
    }

    fn classifier_snapshot(&self) -> OrchestratorResult<Vec<SharedClassifier>> {
        self.classifiers
            .read()
            .map(|c| c.clone())
            .map_err(|_| OrchestratorError::LockPoisoned)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Classify one message under a fresh problem id
    pub async fn classify(
        &self,
        features: &FeatureVector,
        known_label: Option<Label>,
    ) -> OrchestratorResult<ClassifyOutcome> {
        let problem_id = uuid::Uuid::new_v4().to_string();
        self.classify_problem(&problem_id, features, known_label)
            .await
    }

    /// Classify one message under a caller-chosen problem id
    pub async fn classify_problem(
        &self,
        problem_id: &str,
        features: &FeatureVector,
        known_label: Option<Label>,
    ) -> OrchestratorResult<ClassifyOutcome> {
        if self.store.get_problem(problem_id)?.is_some() {
            return Err(OrchestratorError::DuplicateProblem(problem_id.to_string()));
        }

        let classifiers = self.classifier_snapshot()?;
        let answers = self.collect_predictions(&classifiers, features).await;

        // No awaits past this point.
        let (votes, abstentions) = self.build_votes(problem_id, &classifiers, answers)?;

        self.event_bus.publish(ConsensusEvent::VotesCollected {
            problem_id: problem_id.to_string(),
            voters: votes.iter().map(|v| v.agent_id.clone()).collect(),
            abstained: abstentions.len(),
            timestamp: Utc::now(),
        });

        if votes.is_empty() {
            warn!(
                problem_id,
                abstained = abstentions.len(),
                "No agent produced a vote"
            );
            return Err(OrchestratorError::NoAgentsAvailable(problem_id.to_string()));
        }

        let result = self.aggregator.aggregate(&votes)?;
        self.persist(&result, &abstentions)?;

        self.event_bus.publish(ConsensusEvent::ConsensusReached {
            problem_id: problem_id.to_string(),
            decision: result.decision,
            confidence: result.confidence,
            confidence_level: result.confidence_level,
            distribution: result.vote_distribution.summary(result.decision),
            timestamp: result.decided_at,
        });

        info!(
            problem_id,
            decision = %result.decision,
            confidence = result.confidence,
            level = %result.confidence_level,
            votes = votes.len(),
            abstained = abstentions.len(),
            "Consensus reached"
        );

        let (phase, weight_updates) = match known_label {
            Some(truth) => (
                ClassificationPhase::ReputationUpdated,
                self.apply_ground_truth(&result, truth)?,
            ),
            None => (ClassificationPhase::Aggregated, Vec::new()),
        };

        Ok(ClassifyOutcome {
            result,
            abstentions,
            phase,
            weight_updates,
        })
    }

    /// Classify independent messages concurrently without reputation updates
    pub async fn classify_batch(
        &self,
        batch: &[FeatureVector],
    ) -> Vec<OrchestratorResult<ClassifyOutcome>> {
        let requests = batch.iter().map(|features| self.classify(features, None));
        join_all(requests).await
    }

    /// Fan out to every classifier, each under the configured timeout
    async fn collect_predictions(
        &self,
        classifiers: &[SharedClassifier],
        features: &FeatureVector,
    ) -> Vec<Result<Prediction, AgentError>> {
        let timeout = self.config.agent_timeout();

        let requests = classifiers.iter().map(|classifier| async move {
            let start = Instant::now();
            match tokio::time::timeout(timeout, classifier.predict(features)).await {
                Ok(Ok(prediction)) => prediction.validate().map(|_| prediction),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AgentError::Timeout {
                    agent_id: classifier.agent_id().to_string(),
                    elapsed: start.elapsed(),
                }),
            }
        });

        join_all(requests).await
    }

    /// Turn answers into votes at current weights; failures become abstentions
    fn build_votes(
        &self,
        problem_id: &str,
        classifiers: &[SharedClassifier],
        answers: Vec<Result<Prediction, AgentError>>,
    ) -> OrchestratorResult<(Vec<Vote>, Vec<Abstention>)> {
        let mut votes = Vec::with_capacity(answers.len());
        let mut abstentions = Vec::new();

        for (classifier, answer) in classifiers.iter().zip(answers) {
            let agent_id = classifier.agent_id();
            match answer {
                Ok(prediction) => {
                    let weight = self.registry.get_weight(agent_id)?;
                    debug!(
                        problem_id,
                        agent_id,
                        label = %prediction.label,
                        confidence = prediction.confidence,
                        weight,
                        "Vote cast"
                    );
                    votes.push(Vote::new(
                        problem_id,
                        agent_id,
                        prediction.label,
                        prediction.confidence,
                        weight,
                    ));
                }
                Err(e) => {
                    let timed_out = e.is_timeout();
                    warn!(problem_id, agent_id, timed_out, error = %e, "Agent abstained");
                    self.event_bus.publish(ConsensusEvent::AgentAbstained {
                        problem_id: problem_id.to_string(),
                        agent_id: agent_id.to_string(),
                        timed_out,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    abstentions.push(Abstention {
                        agent_id: agent_id.to_string(),
                        reason: e.to_string(),
                        timed_out,
                    });
                }
            }
        }

        Ok((votes, abstentions))
    }

    /// Claim the problem id, then append its votes
    fn persist(
        &self,
        result: &ConsensusResult,
        abstentions: &[Abstention],
    ) -> OrchestratorResult<()> {
        let record = ProblemRecord::aggregated(result.clone(), abstentions.to_vec());
        self.store.insert_problem(&record).map_err(|e| match e {
            StoreError::DuplicateProblem(id) => OrchestratorError::DuplicateProblem(id),
            other => OrchestratorError::Store(other),
        })?;

        for vote in &result.votes {
            self.store.insert_vote(vote)?;
        }
        Ok(())
    }

    // =========================================================================
    // Ground truth
    // =========================================================================

    /// Apply late ground truth to an aggregated problem
    pub fn submit_feedback(
        &self,
        problem_id: &str,
        ground_truth: Label,
    ) -> OrchestratorResult<FeedbackOutcome> {
        let record = self.load_open_problem(problem_id)?;
        let weight_updates = self.apply_ground_truth(&record.result, ground_truth)?;

        Ok(FeedbackOutcome {
            problem_id: problem_id.to_string(),
            ground_truth,
            consensus_correct: record.result.is_correct(ground_truth),
            weight_updates,
        })
    }

    /// Close an aggregated problem without ever learning its label
    pub fn close_without_feedback(&self, problem_id: &str) -> OrchestratorResult<ProblemRecord> {
        let record = self.load_open_problem(problem_id)?;

        self.reputation
            .update(&record.result.votes, &record.result, None)?;

        let closed = self.transition(problem_id, ClassificationPhase::ReputationSkipped, None)?;
        self.event_bus.publish(ConsensusEvent::ReputationSkipped {
            problem_id: problem_id.to_string(),
            timestamp: Utc::now(),
        });

        info!(problem_id, "Problem closed without feedback");
        Ok(closed)
    }

    fn load_open_problem(&self, problem_id: &str) -> OrchestratorResult<ProblemRecord> {
        let record = self
            .store
            .get_problem(problem_id)?
            .ok_or_else(|| OrchestratorError::ProblemNotFound(problem_id.to_string()))?;

        if record.phase.is_terminal() {
            return Err(OrchestratorError::AlreadyResolved {
                problem_id: problem_id.to_string(),
                phase: record.phase,
            });
        }
        Ok(record)
    }

    /// Apply ground truth to a stored problem in one atomic round
    ///
    /// The store checks the phase transition inside the same write that
    /// carries the new weights, so each problem is resolved at most once and a
    /// failed write leaves it `Aggregated` and retryable.
    fn apply_ground_truth(
        &self,
        result: &ConsensusResult,
        truth: Label,
    ) -> OrchestratorResult<Vec<WeightUpdateEvent>> {
        match self.reputation.resolve(result, truth) {
            Ok(ReputationOutcome::Updated { events, .. }) => Ok(events),
            Ok(ReputationOutcome::Skipped) => Ok(Vec::new()),
            Err(ReputationError::Store(StoreError::InvalidTransition {
                problem_id, from, ..
            })) => Err(OrchestratorError::AlreadyResolved {
                problem_id,
                phase: from,
            }),
            Err(ReputationError::Store(StoreError::NotFound(_))) => {
                Err(OrchestratorError::ProblemNotFound(result.problem_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(
        &self,
        problem_id: &str,
        next: ClassificationPhase,
        ground_truth: Option<Label>,
    ) -> OrchestratorResult<ProblemRecord> {
        self.store
            .transition_problem(problem_id, next, ground_truth)
            .map_err(|e| match e {
                StoreError::InvalidTransition {
                    problem_id, from, ..
                } => OrchestratorError::AlreadyResolved {
                    problem_id,
                    phase: from,
                },
                StoreError::NotFound(_) => {
                    OrchestratorError::ProblemNotFound(problem_id.to_string())
                }
                other => OrchestratorError::Store(other),
            })
    }

    // =========================================================================
    // Experiments
    // =========================================================================

    /// Classify labelled samples in order, updating reputations after each
    ///
    /// Requests that fail (e.g. every agent abstained) are counted, not fatal.
    pub async fn run_experiment(
        &self,
        samples: &[LabeledSample],
    ) -> OrchestratorResult<ExperimentReport> {
        let start = Instant::now();
        let mut confidences = Vec::with_capacity(samples.len());
        let mut correct = 0;
        let mut failed_requests = 0;
        let mut spam_decisions = 0;
        let mut ham_decisions = 0;
        let mut abstentions = 0;
        let mut timeouts = 0;

        info!(samples = samples.len(), "Experiment started");

        for (index, sample) in samples.iter().enumerate() {
            match self.classify(&sample.features, Some(sample.label)).await {
                Ok(outcome) => {
                    confidences.push(outcome.result.confidence);
                    if outcome.result.is_correct(sample.label) {
                        correct += 1;
                    }
                    match outcome.result.decision {
                        Label::Spam => spam_decisions += 1,
                        Label::Ham => ham_decisions += 1,
                    }
                    abstentions += outcome.abstentions.len();
                    timeouts += outcome.abstentions.iter().filter(|a| a.timed_out).count();
                }
                Err(OrchestratorError::NoAgentsAvailable(problem_id)) => {
                    warn!(index, problem_id = %problem_id, "Sample skipped, no votes");
                    failed_requests += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let classified = confidences.len();
        let report = ExperimentReport {
            samples: samples.len(),
            classified,
            failed_requests,
            correct,
            accuracy: (classified > 0).then(|| correct as f64 / classified as f64),
            confidence: ConfidenceStats::from_values(&confidences),
            spam_decisions,
            ham_decisions,
            abstentions,
            timeouts,
            final_weights: self.weights()?,
            agents: self.all_agent_stats()?,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            samples = report.samples,
            classified,
            correct,
            failed_requests,
            duration_ms = report.duration_ms,
            "Experiment finished"
        );

        Ok(report)
    }

    // =========================================================================
    // Administration and queries
    // =========================================================================

    /// Reset every agent weight to the initial weight
    pub fn reset_all_weights(&self) -> OrchestratorResult<usize> {
        let agents = self.registry.reset_all()?;
        self.event_bus.publish(ConsensusEvent::WeightsReset {
            agents,
            timestamp: Utc::now(),
        });
        Ok(agents)
    }

    /// Current weights in registration order
    pub fn weights(&self) -> OrchestratorResult<Vec<(AgentId, f64)>> {
        Ok(self.registry.weights()?)
    }

    pub fn agent_stats(&self, agent_id: &str) -> OrchestratorResult<AgentStats> {
        let agent = self.registry.get(agent_id)?;
        let history = self.store.weight_events(Some(agent_id))?;
        Ok(AgentStats::from_agent(&agent, &history))
    }

    pub fn all_agent_stats(&self) -> OrchestratorResult<Vec<AgentStats>> {
        let history = self.store.weight_events(None)?;
        Ok(self
            .registry
            .agents()?
            .iter()
            .map(|agent| {
                let own: Vec<WeightUpdateEvent> = history
                    .iter()
                    .filter(|e| e.agent_id == agent.agent_id)
                    .cloned()
                    .collect();
                AgentStats::from_agent(agent, &own)
            })
            .collect())
    }

    /// Most recent problems, newest first
    pub fn recent_problems(&self, limit: usize) -> OrchestratorResult<Vec<ProblemRecord>> {
        Ok(self.store.recent_problems(limit)?)
    }

    pub fn problem(&self, problem_id: &str) -> OrchestratorResult<ProblemRecord> {
        self.store
            .get_problem(problem_id)?
            .ok_or_else(|| OrchestratorError::ProblemNotFound(problem_id.to_string()))
    }

    /// Chronological weight changes for one agent
    pub fn weight_history(&self, agent_id: &str) -> OrchestratorResult<Vec<WeightUpdateEvent>> {
        if !self.registry.contains(agent_id)? {
            return Err(RegistryError::UnknownAgent(agent_id.to_string()).into());
        }
        Ok(self.store.weight_events(Some(agent_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ScriptedClassifier;
    use crate::events::EventBus;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn test_setup(agents: Vec<ScriptedClassifier>) -> ConsensusOrchestrator {
        let orchestrator = ConsensusOrchestrator::new(
            ConsensusConfig {
                agent_timeout_ms: 100,
                ..Default::default()
            },
            MemoryStore::new().shared(),
            EventBus::new().shared(),
        )
        .unwrap();
        for agent in agents {
            orchestrator.add_classifier(Arc::new(agent)).unwrap();
        }
        orchestrator
    }

    fn features() -> FeatureVector {
        FeatureVector::new(vec![0.1, 0.2])
    }

    #[tokio::test]
    async fn test_classify_with_known_label_updates_weights() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("nb", Label::Spam, 0.92),
            ScriptedClassifier::fixed("svm", Label::Spam, 0.88),
            ScriptedClassifier::fixed("rf", Label::Spam, 0.95),
            ScriptedClassifier::fixed("lr", Label::Ham, 0.45),
        ]);

        let outcome = orchestrator
            .classify(&features(), Some(Label::Spam))
            .await
            .unwrap();

        assert_eq!(outcome.decision(), Label::Spam);
        assert_eq!(outcome.phase, ClassificationPhase::ReputationUpdated);
        assert_eq!(outcome.weight_updates.len(), 4);

        let votes: Vec<&str> = outcome
            .result
            .votes
            .iter()
            .map(|v| v.agent_id.as_str())
            .collect();
        assert_eq!(votes, vec!["nb", "svm", "rf", "lr"]);

        let weights = orchestrator.weights().unwrap();
        assert!((weights[0].1 - 1.05).abs() < 1e-12);
        assert!((weights[3].1 - 0.90).abs() < 1e-12);

        let stored = orchestrator.store().votes_for(outcome.problem_id()).unwrap();
        assert!(stored.iter().all(|v| v.is_correct.is_some()));
    }

    #[tokio::test]
    async fn test_classify_without_label_leaves_weights() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("nb", Label::Ham, 0.9),
            ScriptedClassifier::fixed("svm", Label::Spam, 0.6),
        ]);

        let outcome = orchestrator.classify(&features(), None).await.unwrap();

        assert_eq!(outcome.phase, ClassificationPhase::Aggregated);
        assert!(outcome.weight_updates.is_empty());
        assert!(orchestrator
            .weights()
            .unwrap()
            .iter()
            .all(|(_, w)| *w == 1.0));
    }

    #[tokio::test]
    async fn test_timeout_becomes_abstention() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("fast", Label::Spam, 0.8),
            ScriptedClassifier::fixed("slow", Label::Ham, 0.99).with_delay(Duration::from_secs(5)),
            ScriptedClassifier::failing("down", "connection refused"),
        ]);

        let outcome = orchestrator.classify(&features(), None).await.unwrap();

        assert_eq!(outcome.result.votes.len(), 1);
        assert_eq!(outcome.decision(), Label::Spam);
        assert_eq!(outcome.abstentions.len(), 2);
        let slow = outcome
            .abstentions
            .iter()
            .find(|a| a.agent_id == "slow")
            .unwrap();
        assert!(slow.timed_out);
    }

    #[tokio::test]
    async fn test_invalid_confidence_abstains() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("good", Label::Ham, 0.7),
            ScriptedClassifier::fixed("broken", Label::Spam, 3.0),
        ]);

        let outcome = orchestrator.classify(&features(), None).await.unwrap();
        assert_eq!(outcome.result.votes.len(), 1);
        assert_eq!(outcome.abstentions[0].agent_id, "broken");
        assert!(!outcome.abstentions[0].timed_out);
    }

    #[tokio::test]
    async fn test_no_agents_available() {
        let orchestrator = test_setup(vec![ScriptedClassifier::failing("down", "offline")]);
        let result = orchestrator.classify(&features(), None).await;
        assert!(matches!(result, Err(OrchestratorError::NoAgentsAvailable(_))));

        let empty = test_setup(Vec::new());
        assert!(matches!(
            empty.classify(&features(), None).await,
            Err(OrchestratorError::NoAgentsAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_problem_id() {
        let orchestrator = test_setup(vec![ScriptedClassifier::fixed("nb", Label::Ham, 0.9)]);
        orchestrator
            .classify_problem("msg-1", &features(), None)
            .await
            .unwrap();
        assert!(matches!(
            orchestrator.classify_problem("msg-1", &features(), None).await,
            Err(OrchestratorError::DuplicateProblem(id)) if id == "msg-1"
        ));
    }

    #[tokio::test]
    async fn test_feedback_applies_once() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("nb", Label::Spam, 0.9),
            ScriptedClassifier::fixed("lr", Label::Ham, 0.5),
        ]);
        orchestrator
            .classify_problem("msg-2", &features(), None)
            .await
            .unwrap();

        let feedback = orchestrator.submit_feedback("msg-2", Label::Spam).unwrap();
        assert!(feedback.consensus_correct);
        assert_eq!(feedback.weight_updates.len(), 2);

        assert!(matches!(
            orchestrator.submit_feedback("msg-2", Label::Ham),
            Err(OrchestratorError::AlreadyResolved { .. })
        ));
        assert!((orchestrator.registry().get_weight("nb").unwrap() - 1.05).abs() < 1e-12);
        assert_eq!(orchestrator.weight_history("nb").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_without_feedback() {
        let orchestrator = test_setup(vec![ScriptedClassifier::fixed("nb", Label::Spam, 0.9)]);
        orchestrator
            .classify_problem("msg-3", &features(), None)
            .await
            .unwrap();

        let closed = orchestrator.close_without_feedback("msg-3").unwrap();
        assert_eq!(closed.phase, ClassificationPhase::ReputationSkipped);
        assert_eq!(closed.ground_truth, None);

        assert!(matches!(
            orchestrator.submit_feedback("msg-3", Label::Spam),
            Err(OrchestratorError::AlreadyResolved { .. })
        ));
        assert!(matches!(
            orchestrator.submit_feedback("missing", Label::Spam),
            Err(OrchestratorError::ProblemNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_and_stats() {
        let orchestrator = test_setup(vec![
            ScriptedClassifier::fixed("nb", Label::Spam, 0.9),
            ScriptedClassifier::fixed("lr", Label::Ham, 0.4),
        ]);
        orchestrator
            .classify(&features(), Some(Label::Ham))
            .await
            .unwrap();

        let lr = orchestrator.agent_stats("lr").unwrap();
        assert_eq!(lr.minority_correct, 1);
        assert_eq!(lr.win_vs_majority, Some(1.0));

        assert_eq!(orchestrator.reset_all_weights().unwrap(), 2);
        assert!(orchestrator
            .weights()
            .unwrap()
            .iter()
            .all(|(_, w)| *w == 1.0));
        assert_eq!(orchestrator.agent_stats("lr").unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn test_add_classifier_idempotent() {
        let orchestrator = test_setup(vec![ScriptedClassifier::fixed("nb", Label::Spam, 0.9)]);
        let again = orchestrator
            .add_classifier(Arc::new(ScriptedClassifier::fixed("nb", Label::Ham, 0.1)))
            .unwrap();
        assert!(!again);
        assert_eq!(orchestrator.classifier_count(), 1);
        assert_eq!(orchestrator.registry().len().unwrap(), 1);
    }
}
