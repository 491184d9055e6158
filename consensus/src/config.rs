//! Engine configuration
//!
//! Defaults follow the four-case reward/penalty matrix. Values can be
//! overlaid from `RWPV_*` environment variables or loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::UpdateReason;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables for aggregation and reputation updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Agent correct, consensus correct
    pub reward_correct: f64,
    /// Agent wrong, consensus correct
    pub penalty_wrong: f64,
    /// Agent correct, consensus wrong
    pub reward_minority: f64,
    /// Agent wrong, consensus wrong
    pub penalty_minority: f64,
    /// Weight floor
    pub weight_min: f64,
    /// Weight ceiling
    pub weight_max: f64,
    /// Weight given at registration and by `reset_all`
    pub initial_weight: f64,
    /// Per-agent prediction timeout
    pub agent_timeout_ms: u64,
    /// Lower bound of the `high` confidence bucket
    pub high_confidence: f64,
    /// Lower bound of the `moderate` confidence bucket
    pub moderate_confidence: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            reward_correct: 1.05,
            penalty_wrong: 0.90,
            reward_minority: 1.15,
            penalty_minority: 0.85,
            weight_min: 0.1,
            weight_max: 5.0,
            initial_weight: 1.0,
            agent_timeout_ms: 5_000,
            high_confidence: 0.90,
            moderate_confidence: 0.70,
        }
    }
}

impl ConsensusConfig {
    /// Defaults overlaid with `RWPV_*` environment variables
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        fn env_f64(name: &str, slot: &mut f64) {
            if let Ok(raw) = std::env::var(name) {
                if let Ok(value) = raw.trim().parse() {
                    *slot = value;
                }
            }
        }

        env_f64("RWPV_REWARD_CORRECT", &mut config.reward_correct);
        env_f64("RWPV_PENALTY_WRONG", &mut config.penalty_wrong);
        env_f64("RWPV_REWARD_MINORITY", &mut config.reward_minority);
        env_f64("RWPV_PENALTY_MINORITY", &mut config.penalty_minority);
        env_f64("RWPV_WEIGHT_MIN", &mut config.weight_min);
        env_f64("RWPV_WEIGHT_MAX", &mut config.weight_max);
        env_f64("RWPV_INITIAL_WEIGHT", &mut config.initial_weight);
        env_f64("RWPV_HIGH_CONFIDENCE", &mut config.high_confidence);
        env_f64("RWPV_MODERATE_CONFIDENCE", &mut config.moderate_confidence);

        if let Ok(raw) = std::env::var("RWPV_AGENT_TIMEOUT_MS") {
            if let Ok(ms) = raw.trim().parse() {
                config.agent_timeout_ms = ms;
            }
        }

        config
    }

    /// Parse and validate a TOML document; missing keys keep their defaults
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check internal consistency
    pub fn validate(&self) -> ConfigResult<()> {
        let multipliers = [
            ("reward_correct", self.reward_correct),
            ("penalty_wrong", self.penalty_wrong),
            ("reward_minority", self.reward_minority),
            ("penalty_minority", self.penalty_minority),
        ];
        for (name, value) in multipliers {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive finite multiplier, got {value}"
                )));
            }
        }

        if !(self.weight_min.is_finite() && self.weight_min > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "weight_min must be positive, got {}",
                self.weight_min
            )));
        }
        if !self.weight_max.is_finite() || self.weight_max < self.weight_min {
            return Err(ConfigError::Invalid(format!(
                "weight_max ({}) must be >= weight_min ({})",
                self.weight_max, self.weight_min
            )));
        }
        if !self.weight_in_bounds(self.initial_weight) {
            return Err(ConfigError::Invalid(format!(
                "initial_weight {} outside [{}, {}]",
                self.initial_weight, self.weight_min, self.weight_max
            )));
        }

        if !(0.0 < self.moderate_confidence
            && self.moderate_confidence <= self.high_confidence
            && self.high_confidence <= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "confidence thresholds must satisfy 0 < moderate ({}) <= high ({}) <= 1",
                self.moderate_confidence, self.high_confidence
            )));
        }

        if self.agent_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "agent_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Multiplier applied for a reputation case
    pub fn multiplier_for(&self, reason: UpdateReason) -> f64 {
        match reason {
            UpdateReason::AgreedCorrect => self.reward_correct,
            UpdateReason::DissentedWrong => self.penalty_wrong,
            UpdateReason::MinorityCorrect => self.reward_minority,
            UpdateReason::BothWrong => self.penalty_minority,
        }
    }

    /// Clamp a weight into `[weight_min, weight_max]`
    pub fn clamp_weight(&self, weight: f64) -> f64 {
        weight.clamp(self.weight_min, self.weight_max)
    }

    pub fn weight_in_bounds(&self, weight: f64) -> bool {
        weight.is_finite() && weight >= self.weight_min && weight <= self.weight_max
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConsensusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.multiplier_for(UpdateReason::AgreedCorrect), 1.05);
        assert_eq!(config.multiplier_for(UpdateReason::DissentedWrong), 0.90);
        assert_eq!(config.multiplier_for(UpdateReason::MinorityCorrect), 1.15);
        assert_eq!(config.multiplier_for(UpdateReason::BothWrong), 0.85);
    }

    #[test]
    fn test_toml_partial_override() {
        let config = ConsensusConfig::from_toml_str(
            r#"
reward_correct = 1.10
agent_timeout_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(config.reward_correct, 1.10);
        assert_eq!(config.agent_timeout(), Duration::from_millis(250));
        assert_eq!(config.penalty_wrong, 0.90);
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = ConsensusConfig::from_toml_str("weight_min = 2.0\nweight_max = 1.0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_non_positive_multiplier() {
        let config = ConsensusConfig {
            penalty_minority: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_initial_weight_outside_bounds() {
        let config = ConsensusConfig {
            initial_weight: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_weight() {
        let config = ConsensusConfig::default();
        assert_eq!(config.clamp_weight(0.01), 0.1);
        assert_eq!(config.clamp_weight(9.0), 5.0);
        assert_eq!(config.clamp_weight(1.3), 1.3);
    }

    #[test]
    fn test_parse_error_surfaces() {
        let result = ConsensusConfig::from_toml_str("reward_correct = \"lots\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
