//! Reputation-Weighted Consensus Engine
//!
//! This library classifies messages as spam or ham by polling a pool of
//! independent classifiers and combining their answers with a trust score
//! that each agent earns over time:
//! - Fan-out of `predict` to every classifier, each under its own timeout
//! - Reputation-weighted aggregation into a decision with confidence
//! - A four-case weight update once the true label is known
//! - Pluggable persistence (in-memory, or RocksDB with the `persistent` feature)
//! - In-process event notifications for dashboards and loggers
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use consensus::{ConsensusConfig, ConsensusOrchestrator, EventBus, Label, MemoryStore};
//! use consensus::agents::ScriptedClassifier;
//!
//! let orchestrator = ConsensusOrchestrator::new(
//!     ConsensusConfig::from_env(),
//!     MemoryStore::new().shared(),
//!     EventBus::new().shared(),
//! )?;
//! orchestrator.add_classifier(Arc::new(ScriptedClassifier::fixed("nb", Label::Spam, 0.9)))?;
//!
//! let outcome = orchestrator.classify(&vec![0.3, 0.7].into(), None).await?;
//! println!("{}", outcome.result.explanation());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agents;
pub mod aggregator;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod reputation;
pub mod stats;
pub mod store;
pub mod types;

pub use agents::{AgentError, Classifier, FeatureVector, Prediction, SharedClassifier};
pub use aggregator::{AggregationError, Aggregator};
pub use config::{ConfigError, ConsensusConfig};
pub use events::{ConsensusEvent, EventBus, EventFilter, SharedEventBus};
pub use orchestrator::{
    ClassifyOutcome, ConsensusOrchestrator, FeedbackOutcome, OrchestratorError,
    OrchestratorResult, SharedOrchestrator,
};
pub use registry::{
    AgentRegistry, OutcomeUpdate, RegistryError, SharedAgentRegistry, StagedOutcome, WeightChange,
};
pub use reputation::{ReputationError, ReputationManager, ReputationOutcome};
pub use stats::{AgentStats, ConfidenceStats, ExperimentReport, LabeledSample, WeightTrend};
#[cfg(feature = "persistent")]
pub use store::RocksStore;
pub use store::{ConsensusStore, MemoryStore, ReputationRound, SharedStore, StoreError};
pub use types::{
    Abstention, Agent, AgentId, ClassificationPhase, ConfidenceLevel, ConsensusResult, Label,
    ProblemId, ProblemRecord, TieBreak, UpdateReason, Vote, VoteDistribution, WeightUpdateEvent,
};
