//! Concurrency tests for the agent registry and parallel requests.
//!
//! Tests verify:
//! - Concurrent updates to one agent are never lost
//! - Updates to different agents proceed independently
//! - Concurrent labelled requests compose multiplicatively
//! - Racing feedback for one problem is applied exactly once

use std::sync::Arc;

use consensus::agents::ScriptedClassifier;
use consensus::{
    AgentRegistry, ConsensusConfig, ConsensusOrchestrator, EventBus, FeatureVector, Label,
    MemoryStore, OrchestratorError,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deltas_on_one_agent() {
    let registry = AgentRegistry::new(MemoryStore::new().shared(), ConsensusConfig::default())
        .unwrap()
        .shared();
    registry.register("nb", "naive_bayes").unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                // Small steps keep every interleaving away from the bounds
                let multiplier = if i % 2 == 0 { 1.001 } else { 0.999 };
                for _ in 0..50 {
                    registry.apply_weight_delta("nb", multiplier).unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let expected = 1.001f64.powi(400) * 0.999f64.powi(400);
    let actual = registry.get_weight("nb").unwrap();
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_deltas_on_distinct_agents() {
    let registry = AgentRegistry::new(MemoryStore::new().shared(), ConsensusConfig::default())
        .unwrap()
        .shared();
    for i in 0..8 {
        registry.register(&format!("agent-{i}"), "test").unwrap();
    }

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let id = format!("agent-{i}");
                for _ in 0..i {
                    registry.apply_weight_delta(&id, 1.05).unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..8 {
        let w = registry.get_weight(&format!("agent-{i}")).unwrap();
        assert!((w - 1.05f64.powi(i)).abs() < 1e-12);
    }
}

fn shared_orchestrator() -> Arc<ConsensusOrchestrator> {
    let orchestrator = ConsensusOrchestrator::new(
        ConsensusConfig::default(),
        MemoryStore::new().shared(),
        EventBus::new().shared(),
    )
    .unwrap();
    orchestrator
        .add_classifier(Arc::new(ScriptedClassifier::fixed("nb", Label::Spam, 0.9)))
        .unwrap();
    orchestrator
        .add_classifier(Arc::new(ScriptedClassifier::fixed("svm", Label::Spam, 0.8)))
        .unwrap();
    orchestrator
        .add_classifier(Arc::new(ScriptedClassifier::fixed("lr", Label::Ham, 0.4)))
        .unwrap();
    orchestrator.shared()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_compose() {
    let orchestrator = shared_orchestrator();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .classify(&FeatureVector::new(vec![1.0]), Some(Label::Spam))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let registry = orchestrator.registry();
    assert!((registry.get_weight("nb").unwrap() - 1.05f64.powi(10)).abs() < 1e-9);
    assert!((registry.get_weight("lr").unwrap() - 0.9f64.powi(10)).abs() < 1e-9);
    assert_eq!(registry.get("lr").unwrap().total_votes, 10);
    assert_eq!(orchestrator.store().weight_events(None).unwrap().len(), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_feedback_applies_once() {
    let orchestrator = shared_orchestrator();
    orchestrator
        .classify_problem("msg-race", &FeatureVector::new(vec![1.0]), None)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.submit_feedback("msg-race", Label::Spam) })
        })
        .collect();

    let mut applied = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => applied += 1,
            Err(OrchestratorError::AlreadyResolved { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(rejected, 7);
    assert!((orchestrator.registry().get_weight("nb").unwrap() - 1.05).abs() < 1e-12);
    assert_eq!(orchestrator.weight_history("nb").unwrap().len(), 1);
}
