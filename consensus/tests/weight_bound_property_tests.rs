//! Weight and aggregation property tests: loop-based validation of
//! reputation invariants across varied inputs.
//!
//! Tests verify:
//! - Weights stay within [weight_min, weight_max] under any update sequence
//! - Each reputation case applies exactly its configured multiplier
//! - Aggregation is independent of vote order, ties included
//! - Confidence is always within [0, 1]
//! - Votes are unique per (problem, agent)

use consensus::{
    AgentRegistry, Aggregator, ConsensusConfig, ConsensusStore, EventBus, Label, MemoryStore,
    ReputationManager, StoreError, UpdateReason, Vote,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const REASONS: [UpdateReason; 4] = [
    UpdateReason::AgreedCorrect,
    UpdateReason::DissentedWrong,
    UpdateReason::MinorityCorrect,
    UpdateReason::BothWrong,
];

// ── Property: weights never leave their bounds ─────────────────────

#[test]
fn prop_weights_stay_in_bounds() {
    let config = ConsensusConfig::default();

    for seed in [1u64, 7, 42, 1337, 9001] {
        let mut rng = StdRng::seed_from_u64(seed);
        let registry = AgentRegistry::new(MemoryStore::new().shared(), config.clone()).unwrap();
        registry.register("agent", "test").unwrap();

        for step in 0..500 {
            let reason = REASONS[rng.gen_range(0..REASONS.len())];
            let confidence: f64 = rng.gen();
            let change = registry
                .record_outcome("agent", reason, config.multiplier_for(reason), confidence)
                .unwrap();

            assert!(
                change.new_weight >= config.weight_min && change.new_weight <= config.weight_max,
                "seed {seed} step {step}: weight {} out of bounds",
                change.new_weight
            );
        }

        let agent = registry.get("agent").unwrap();
        assert_eq!(agent.total_votes, 500);
        assert_eq!(
            agent.agreed_correct + agent.dissent_wrong + agent.minority_correct + agent.both_wrong,
            500
        );
    }
}

#[test]
fn prop_custom_bounds_respected() {
    for (min, max) in [(0.5, 2.0), (0.01, 100.0), (1.0, 1.0)] {
        let config = ConsensusConfig {
            weight_min: min,
            weight_max: max,
            initial_weight: min,
            ..Default::default()
        };
        config.validate().unwrap();

        let registry = AgentRegistry::new(MemoryStore::new().shared(), config).unwrap();
        registry.register("agent", "test").unwrap();

        for _ in 0..200 {
            let w = registry.apply_weight_delta("agent", 1.15).unwrap();
            assert!(w <= max);
        }
        assert_eq!(registry.get_weight("agent").unwrap(), max);

        for _ in 0..400 {
            let w = registry.apply_weight_delta("agent", 0.85).unwrap();
            assert!(w >= min);
        }
        assert_eq!(registry.get_weight("agent").unwrap(), min);
    }
}

// ── Property: exactly one multiplier per resolved vote ─────────────

#[test]
fn prop_each_case_applies_its_multiplier() {
    let config = ConsensusConfig::default();
    let cases = [
        (Label::Spam, Label::Spam, Label::Spam, 1.05),
        (Label::Ham, Label::Spam, Label::Spam, 0.90),
        (Label::Ham, Label::Spam, Label::Ham, 1.15),
        (Label::Spam, Label::Spam, Label::Ham, 0.85),
    ];

    for (agent_vote, majority_vote, truth, expected) in cases {
        let store = MemoryStore::new().shared();
        let registry = AgentRegistry::new(store.clone(), config.clone())
            .unwrap()
            .shared();
        for id in ["subject", "m1", "m2", "m3"] {
            registry.register(id, "test").unwrap();
        }
        let manager = ReputationManager::new(registry.clone(), store, EventBus::new().shared());

        let votes = vec![
            Vote::new("p", "subject", agent_vote, 0.5, 1.0),
            Vote::new("p", "m1", majority_vote, 0.9, 1.0),
            Vote::new("p", "m2", majority_vote, 0.9, 1.0),
            Vote::new("p", "m3", majority_vote, 0.9, 1.0),
        ];
        let consensus = Aggregator::default().aggregate(&votes).unwrap();
        assert_eq!(consensus.decision, majority_vote);

        manager.update(&votes, &consensus, Some(truth)).unwrap();

        let w = registry.get_weight("subject").unwrap();
        assert!(
            (w - expected).abs() < 1e-12,
            "agent {agent_vote} / consensus {majority_vote} / truth {truth}: {w} != {expected}"
        );
    }
}

// ── Property: aggregation ignores vote order ───────────────────────

#[test]
fn prop_aggregation_order_independent() {
    let aggregator = Aggregator::default();

    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = rng.gen_range(1..=7usize);
        let votes: Vec<Vote> = (0..count)
            .map(|i| {
                let label = if rng.gen_bool(0.5) {
                    Label::Spam
                } else {
                    Label::Ham
                };
                // Coarse values so exact ties show up regularly
                let confidence = rng.gen_range(0..4u32) as f64 * 0.25;
                let weight = 1.0 + rng.gen_range(0..3u32) as f64 * 0.5;
                Vote::new("p", format!("agent-{i}"), label, confidence, weight)
            })
            .collect();

        let forward = aggregator.aggregate(&votes).unwrap();
        let reversed: Vec<Vote> = votes.iter().rev().cloned().collect();
        let backward = aggregator.aggregate(&reversed).unwrap();

        assert_eq!(forward.decision, backward.decision, "seed {seed}");
        assert_eq!(forward.tie_break, backward.tie_break, "seed {seed}");
        assert!((forward.confidence - backward.confidence).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&forward.confidence));
    }
}

// ── Property: one vote per (problem, agent) ────────────────────────

#[test]
fn prop_votes_unique_per_problem_and_agent() {
    let store = MemoryStore::new();

    for problem in 0..10 {
        for agent in 0..4 {
            let vote = Vote::new(format!("p{problem}"), format!("a{agent}"), Label::Ham, 0.5, 1.0);
            store.insert_vote(&vote).unwrap();
            assert!(matches!(
                store.insert_vote(&vote),
                Err(StoreError::DuplicateVote { .. })
            ));
        }
    }

    for problem in 0..10 {
        assert_eq!(store.votes_for(&format!("p{problem}")).unwrap().len(), 4);
    }
}
