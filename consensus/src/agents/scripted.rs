//! In-process classifier driven by a closure
//!
//! Used by tests and the bench CLI to stand in for real models: fixed
//! answers, answers derived from the features, artificial latency, failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentError, AgentResult, Classifier, FeatureVector, Prediction};
use crate::types::Label;

type PredictFn = dyn Fn(&FeatureVector) -> AgentResult<Prediction> + Send + Sync;

/// Deterministic classifier for tests and simulations
pub struct ScriptedClassifier {
    agent_id: String,
    model_kind: String,
    script: Arc<PredictFn>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl ScriptedClassifier {
    pub fn new<F>(agent_id: impl Into<String>, model_kind: impl Into<String>, script: F) -> Self
    where
        F: Fn(&FeatureVector) -> AgentResult<Prediction> + Send + Sync + 'static,
    {
        Self {
            agent_id: agent_id.into(),
            model_kind: model_kind.into(),
            script: Arc::new(script),
            delay: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Always answers with the same label and confidence
    pub fn fixed(agent_id: impl Into<String>, label: Label, confidence: f64) -> Self {
        Self::new(agent_id, "scripted", move |_| {
            Ok(Prediction { label, confidence })
        })
    }

    /// Always fails with [`AgentError::Unavailable`]
    pub fn failing(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(agent_id, "scripted", move |_| {
            Err(AgentError::Unavailable(message.clone()))
        })
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_model_kind(mut self, model_kind: impl Into<String>) -> Self {
        self.model_kind = model_kind.into();
        self
    }

    /// Number of `predict` calls started so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn model_kind(&self) -> &str {
        &self.model_kind
    }

    async fn predict(&self, features: &FeatureVector) -> AgentResult<Prediction> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_answer() {
        let classifier = ScriptedClassifier::fixed("nb", Label::Spam, 0.8);
        let prediction = classifier.predict(&FeatureVector::default()).await.unwrap();
        assert_eq!(prediction.label, Label::Spam);
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_script_sees_features() {
        let classifier = ScriptedClassifier::new("threshold", "rule", |features| {
            let label = if features.as_slice().iter().sum::<f64>() > 1.0 {
                Label::Spam
            } else {
                Label::Ham
            };
            Prediction::new(label, 0.7)
        });

        let spam = classifier.predict(&vec![0.8, 0.9].into()).await.unwrap();
        let ham = classifier.predict(&vec![0.1].into()).await.unwrap();
        assert_eq!(spam.label, Label::Spam);
        assert_eq!(ham.label, Label::Ham);
    }

    #[tokio::test]
    async fn test_failing() {
        let classifier = ScriptedClassifier::failing("down", "model not loaded");
        let err = classifier.predict(&FeatureVector::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }
}
