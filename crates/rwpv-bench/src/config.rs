use anyhow::{Context, Result};
use consensus::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape of the simulated agent pool and sample stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Agents that answer correctly except for `noise`
    pub honest_agents: usize,
    /// Agents that always answer the opposite label
    pub byzantine_agents: usize,
    /// Probability an honest agent flips its answer
    pub noise: f64,
    /// Number of labelled samples per experiment
    pub samples: usize,
    /// Fraction of samples that are spam
    pub spam_ratio: f64,
    /// Seed for the sample stream and every agent
    pub seed: u64,
    /// Artificial per-prediction latency
    pub latency_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            honest_agents: 4,
            byzantine_agents: 1,
            noise: 0.1,
            samples: 200,
            spam_ratio: 0.4,
            seed: 42,
            latency_ms: 0,
        }
    }
}

/// Top-level bench configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub consensus: ConsensusConfig,
    pub simulation: SimulationConfig,
}

impl BenchConfig {
    /// Defaults with the engine section overlaid from `RWPV_*` variables.
    pub fn from_env() -> Self {
        Self {
            consensus: ConsensusConfig::from_env(),
            simulation: SimulationConfig::default(),
        }
    }

    /// Load from a TOML file with `[consensus]` and `[simulation]` tables.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.consensus
            .validate()
            .context("Invalid [consensus] section")?;

        let sim = &self.simulation;
        if sim.honest_agents + sim.byzantine_agents == 0 {
            anyhow::bail!("simulation needs at least one agent");
        }
        if !(0.0..=1.0).contains(&sim.noise) {
            anyhow::bail!("noise must be within [0, 1], got {}", sim.noise);
        }
        if !(0.0..=1.0).contains(&sim.spam_ratio) {
            anyhow::bail!("spam_ratio must be within [0, 1], got {}", sim.spam_ratio);
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render config as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let config: BenchConfig = toml::from_str(
            r#"
[consensus]
penalty_wrong = 0.8

[simulation]
byzantine_agents = 3
"#,
        )
        .unwrap();

        assert_eq!(config.consensus.penalty_wrong, 0.8);
        assert_eq!(config.consensus.reward_correct, 1.05);
        assert_eq!(config.simulation.byzantine_agents, 3);
        assert_eq!(config.simulation.honest_agents, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_empty_pool() {
        let mut config = BenchConfig::default();
        config.simulation.honest_agents = 0;
        config.simulation.byzantine_agents = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_renders_back_to_toml() {
        let rendered = BenchConfig::default().to_toml().unwrap();
        let parsed: BenchConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, BenchConfig::default());
    }
}
