//! Experiment reports and per-agent reputation statistics

use serde::{Deserialize, Serialize};

use crate::agents::FeatureVector;
use crate::types::{Agent, AgentId, Label, WeightUpdateEvent};

/// One labelled input for [`run_experiment`](crate::orchestrator::ConsensusOrchestrator::run_experiment)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub features: FeatureVector,
    pub label: Label,
}

impl LabeledSample {
    pub fn new(features: impl Into<FeatureVector>, label: Label) -> Self {
        Self {
            features: features.into(),
            label,
        }
    }
}

/// Summary statistics over a set of confidences
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ConfidenceStats {
    /// All-zero stats for an empty slice
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        }
    }
}

/// Direction of the most recent weight change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTrend {
    Increasing,
    Decreasing,
    Stable,
}

impl WeightTrend {
    /// Trend of the last event in a chronological history
    pub fn from_history(history: &[WeightUpdateEvent]) -> Self {
        match history.last() {
            Some(last) if last.new_weight > last.previous_weight => WeightTrend::Increasing,
            Some(last) if last.new_weight < last.previous_weight => WeightTrend::Decreasing,
            _ => WeightTrend::Stable,
        }
    }
}

impl std::fmt::Display for WeightTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightTrend::Increasing => write!(f, "increasing"),
            WeightTrend::Decreasing => write!(f, "decreasing"),
            WeightTrend::Stable => write!(f, "stable"),
        }
    }
}

/// Reputation statistics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: AgentId,
    pub model_kind: String,
    pub weight: f64,
    pub total_votes: u64,
    pub correct_votes: u64,
    pub accuracy: Option<f64>,
    pub average_confidence: Option<f64>,
    pub agreed_correct: u64,
    pub dissent_wrong: u64,
    pub minority_correct: u64,
    pub both_wrong: u64,
    /// Share of the agent's correct votes where it was right against the consensus
    pub win_vs_majority: Option<f64>,
    /// Share of resolved votes where the agent sided with the consensus
    pub agreement_rate: Option<f64>,
    pub weight_trend: WeightTrend,
    pub weight_updates: usize,
}

impl AgentStats {
    /// Derive stats from an agent record and its chronological weight history
    pub fn from_agent(agent: &Agent, history: &[WeightUpdateEvent]) -> Self {
        let wins = agent.minority_correct + agent.agreed_correct;
        let win_vs_majority = (wins > 0).then(|| agent.minority_correct as f64 / wins as f64);
        let agreement_rate = (agent.total_votes > 0).then(|| {
            (agent.agreed_correct + agent.both_wrong) as f64 / agent.total_votes as f64
        });

        Self {
            agent_id: agent.agent_id.clone(),
            model_kind: agent.model_kind.clone(),
            weight: agent.weight,
            total_votes: agent.total_votes,
            correct_votes: agent.correct_votes,
            accuracy: agent.accuracy(),
            average_confidence: agent.average_confidence(),
            agreed_correct: agent.agreed_correct,
            dissent_wrong: agent.dissent_wrong,
            minority_correct: agent.minority_correct,
            both_wrong: agent.both_wrong,
            win_vs_majority,
            agreement_rate,
            weight_trend: WeightTrend::from_history(history),
            weight_updates: history.len(),
        }
    }
}

/// Result of a batch of labelled classifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub samples: usize,
    /// Samples that produced a decision
    pub classified: usize,
    /// Samples that failed outright (e.g. every agent abstained)
    pub failed_requests: usize,
    pub correct: usize,
    pub accuracy: Option<f64>,
    pub confidence: ConfidenceStats,
    pub spam_decisions: usize,
    pub ham_decisions: usize,
    pub abstentions: usize,
    pub timeouts: usize,
    pub final_weights: Vec<(AgentId, f64)>,
    pub agents: Vec<AgentStats>,
    pub duration_ms: u64,
}

impl ExperimentReport {
    /// Multi-line, human-readable summary
    pub fn summary(&self) -> String {
        let mut text = format!(
            "samples: {} (classified {}, failed {})\n",
            self.samples, self.classified, self.failed_requests
        );
        match self.accuracy {
            Some(acc) => text.push_str(&format!(
                "accuracy: {:.2}% ({}/{})\n",
                acc * 100.0,
                self.correct,
                self.classified
            )),
            None => text.push_str("accuracy: n/a\n"),
        }
        text.push_str(&format!(
            "confidence: mean {:.3} std {:.3} min {:.3} max {:.3}\n",
            self.confidence.mean, self.confidence.std_dev, self.confidence.min, self.confidence.max
        ));
        text.push_str(&format!(
            "decisions: spam {} ham {}, abstentions {} (timeouts {})\n",
            self.spam_decisions, self.ham_decisions, self.abstentions, self.timeouts
        ));
        for stats in &self.agents {
            text.push_str(&format!(
                "  {:<16} weight {:.4} accuracy {} trend {}\n",
                stats.agent_id,
                stats.weight,
                stats
                    .accuracy
                    .map(|a| format!("{:.2}%", a * 100.0))
                    .unwrap_or_else(|| "n/a".to_string()),
                stats.weight_trend,
            ));
        }
        text
    }
}
