//! Seeded stand-ins for trained classifiers.
//!
//! Samples carry their true class in the first feature (`1.0` spam, `0.0`
//! ham) followed by filler noise. Honest agents read that feature and flip
//! their answer with probability `noise`; byzantine agents always invert it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use consensus::agents::{AgentError, ScriptedClassifier};
use consensus::{FeatureVector, Label, LabeledSample, Prediction, SharedClassifier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;

const FILLER_FEATURES: usize = 7;

/// Deterministic labelled sample stream.
pub fn generate_samples(config: &SimulationConfig) -> Vec<LabeledSample> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    (0..config.samples)
        .map(|_| {
            let label = if rng.gen_bool(config.spam_ratio) {
                Label::Spam
            } else {
                Label::Ham
            };
            let mut features = Vec::with_capacity(FILLER_FEATURES + 1);
            features.push(label.class() as f64);
            features.extend((0..FILLER_FEATURES).map(|_| rng.gen::<f64>()));
            LabeledSample::new(features, label)
        })
        .collect()
}

fn true_label(features: &FeatureVector) -> Result<Label, AgentError> {
    match features.as_slice().first() {
        Some(signal) if *signal >= 0.5 => Ok(Label::Spam),
        Some(_) => Ok(Label::Ham),
        None => Err(AgentError::InvalidResponse("empty feature vector".to_string())),
    }
}

/// An agent that is right with probability `1 - noise`.
pub fn honest_agent(agent_id: &str, noise: f64, seed: u64) -> ScriptedClassifier {
    let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
    ScriptedClassifier::new(agent_id, "simulated_honest", move |features: &FeatureVector| {
        let truth = true_label(features)?;
        let mut rng = rng
            .lock()
            .map_err(|_| AgentError::Unavailable("rng lock poisoned".to_string()))?;

        let label = if rng.gen_bool(noise) {
            truth.other()
        } else {
            truth
        };
        Prediction::new(label, rng.gen_range(0.55..=0.99))
    })
}

/// An agent that always answers the wrong label with high confidence.
pub fn byzantine_agent(agent_id: &str) -> ScriptedClassifier {
    ScriptedClassifier::new(agent_id, "simulated_byzantine", |features: &FeatureVector| {
        let truth = true_label(features)?;
        Prediction::new(truth.other(), 0.95)
    })
}

/// Build the full simulated pool described by `config`.
pub fn build_pool(config: &SimulationConfig) -> Vec<SharedClassifier> {
    let latency = Duration::from_millis(config.latency_ms);
    let mut pool: Vec<SharedClassifier> = Vec::new();

    for i in 0..config.honest_agents {
        let agent = honest_agent(
            &format!("honest-{i}"),
            config.noise,
            config.seed.wrapping_add(1 + i as u64),
        );
        pool.push(Arc::new(with_latency(agent, latency)));
    }
    for i in 0..config.byzantine_agents {
        let agent = byzantine_agent(&format!("byzantine-{i}"));
        pool.push(Arc::new(with_latency(agent, latency)));
    }

    pool
}

fn with_latency(agent: ScriptedClassifier, latency: Duration) -> ScriptedClassifier {
    if latency.is_zero() {
        agent
    } else {
        agent.with_delay(latency)
    }
}
