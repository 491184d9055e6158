//! Classifier backed by a remote model endpoint
//!
//! Posts `{"features": [...]}` and expects `{"label": ..., "confidence": ...}`
//! back, where `label` is `"spam"`/`"ham"` or the numeric class `1`/`0`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AgentError, AgentResult, Classifier, FeatureVector, Prediction};
use crate::types::Label;

/// Upper bound for a single HTTP exchange; the orchestrator's per-agent
/// timeout is usually tighter
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct PredictRequest<'a> {
    features: &'a [f64],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireLabel {
    Class(u8),
    Name(String),
}

#[derive(Deserialize)]
struct PredictResponse {
    label: WireLabel,
    confidence: f64,
}

impl PredictResponse {
    fn into_prediction(self) -> AgentResult<Prediction> {
        let label = match self.label {
            WireLabel::Class(class) => Label::from_class(class)
                .ok_or_else(|| AgentError::InvalidResponse(format!("unknown class {class}")))?,
            WireLabel::Name(name) => name.parse().map_err(AgentError::InvalidResponse)?,
        };
        Prediction::new(label, self.confidence)
    }
}

/// HTTP/JSON classifier client
pub struct HttpClassifier {
    agent_id: String,
    model_kind: String,
    endpoint: String,
    http: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(
        agent_id: impl Into<String>,
        model_kind: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Request(e.to_string()))?;

        Ok(Self {
            agent_id: agent_id.into(),
            model_kind: model_kind.into(),
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn model_kind(&self) -> &str {
        &self.model_kind
    }

    async fn predict(&self, features: &FeatureVector) -> AgentResult<Prediction> {
        let request = PredictRequest {
            features: features.as_slice(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AgentError::Unavailable(e.to_string())
                } else {
                    AgentError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Request(format!("HTTP {}: {}", status, body)));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let prediction = body.into_prediction()?;
        debug!(
            agent_id = %self.agent_id,
            label = %prediction.label,
            confidence = prediction.confidence,
            "Remote prediction received"
        );
        Ok(prediction)
    }
}
