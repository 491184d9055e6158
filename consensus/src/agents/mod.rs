//! Classifier capability and the bundled implementations
//!
//! The engine only ever sees `dyn Classifier`: an id, a model tag, and an
//! async `predict` that turns a feature vector into a label and confidence.
//! Feature extraction and the models themselves live outside this crate.

pub mod http;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Label;

pub use http::HttpClassifier;
pub use scripted::ScriptedClassifier;

/// Error type for a single agent's prediction
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent {agent_id} timed out after {elapsed:?}")]
    Timeout { agent_id: String, elapsed: Duration },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}

/// Result type for agent predictions
pub type AgentResult<T> = Result<T, AgentError>;

/// Shared, type-erased classifier handle
pub type SharedClassifier = Arc<dyn Classifier>;

/// Opaque numeric representation of one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(pub Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// A classifier's answer for one message
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    pub confidence: f64,
}

impl Prediction {
    /// Build a prediction, rejecting confidences outside `[0, 1]` or non-finite
    pub fn new(label: Label, confidence: f64) -> AgentResult<Self> {
        let prediction = Self { label, confidence };
        prediction.validate()?;
        Ok(prediction)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(AgentError::InvalidResponse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )))
        }
    }
}

/// Anything that can classify a feature vector
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Stable id matching the registry record
    fn agent_id(&self) -> &str;

    /// Model family tag
    fn model_kind(&self) -> &str;

    async fn predict(&self, features: &FeatureVector) -> AgentResult<Prediction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_confidence_bounds() {
        assert!(Prediction::new(Label::Spam, 0.0).is_ok());
        assert!(Prediction::new(Label::Spam, 1.0).is_ok());
        assert!(matches!(
            Prediction::new(Label::Ham, 1.2),
            Err(AgentError::InvalidResponse(_))
        ));
        assert!(Prediction::new(Label::Ham, f64::NAN).is_err());
    }

    #[test]
    fn test_feature_vector_serializes_as_array() {
        let features = FeatureVector::from(vec![0.5, 1.0]);
        assert_eq!(serde_json::to_string(&features).unwrap(), "[0.5,1.0]");
    }
}
