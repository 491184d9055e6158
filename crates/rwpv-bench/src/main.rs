//! rwpv-bench: drive the consensus engine with simulated agents
//!
//! ```bash
//! # Seeded experiment with the default pool (4 honest, 1 byzantine)
//! rwpv-bench experiment --samples 500 --seed 7
//!
//! # Heavier adversary, JSON report
//! rwpv-bench experiment --byzantine 3 --noise 0.2 --json
//!
//! # Replay the three reference scenarios
//! rwpv-bench scenarios
//! ```

mod config;
mod simulated;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use consensus::agents::ScriptedClassifier;
use consensus::events::EventFilter;
use consensus::{
    ConsensusConfig, ConsensusEvent, ConsensusOrchestrator, EventBus, FeatureVector, Label,
    MemoryStore, SharedStore,
};
use tracing::{debug, info};

use config::BenchConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with [consensus] and [simulation] tables (defaults plus RWPV_* otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a seeded batch experiment with simulated agents
    Experiment {
        /// Number of labelled samples
        #[arg(long)]
        samples: Option<usize>,

        /// Seed for samples and agents
        #[arg(long)]
        seed: Option<u64>,

        /// Number of honest agents
        #[arg(long)]
        honest: Option<usize>,

        /// Number of always-wrong agents
        #[arg(long)]
        byzantine: Option<usize>,

        /// Probability an honest agent answers wrong
        #[arg(long)]
        noise: Option<f64>,

        /// Print the report as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,

        /// RocksDB directory for persistent reputation (requires the `persistent` feature)
        #[arg(long)]
        state_path: Option<PathBuf>,
    },

    /// Replay the three reference scenarios and print the resulting weights
    Scenarios,

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::from_env(),
    };

    match args.command {
        Command::Experiment {
            samples,
            seed,
            honest,
            byzantine,
            noise,
            json,
            state_path,
        } => {
            let sim = &mut config.simulation;
            if let Some(v) = samples {
                sim.samples = v;
            }
            if let Some(v) = seed {
                sim.seed = v;
            }
            if let Some(v) = honest {
                sim.honest_agents = v;
            }
            if let Some(v) = byzantine {
                sim.byzantine_agents = v;
            }
            if let Some(v) = noise {
                sim.noise = v;
            }
            config.validate()?;
            run_experiment(&config, json, state_path).await
        }
        Command::Scenarios => run_scenarios(&config.consensus).await,
        Command::ShowConfig => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn open_store(state_path: Option<PathBuf>) -> Result<SharedStore> {
    match state_path {
        #[cfg(feature = "persistent")]
        Some(path) => {
            info!(path = %path.display(), "Opening persistent store");
            Ok(consensus::RocksStore::open(&path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?
                .shared())
        }
        #[cfg(not(feature = "persistent"))]
        Some(_) => anyhow::bail!("--state-path requires building with the `persistent` feature"),
        None => Ok(MemoryStore::new().shared()),
    }
}

async fn run_experiment(
    config: &BenchConfig,
    json: bool,
    state_path: Option<PathBuf>,
) -> Result<()> {
    let sim = &config.simulation;
    info!(
        honest = sim.honest_agents,
        byzantine = sim.byzantine_agents,
        noise = sim.noise,
        samples = sim.samples,
        seed = sim.seed,
        "Starting experiment"
    );

    let bus = EventBus::new().shared();
    let store = open_store(state_path)?;
    let orchestrator = ConsensusOrchestrator::new(config.consensus.clone(), store, bus.clone())
        .context("Failed to build orchestrator")?;

    for classifier in simulated::build_pool(sim) {
        orchestrator.add_classifier(classifier)?;
    }

    // Trace every reputation change while the experiment runs
    let mut weight_updates =
        bus.subscribe_filtered(EventFilter::new().types(vec!["weight_updated"]));
    let watcher = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(event) = weight_updates.recv().await {
            if let ConsensusEvent::WeightUpdated {
                agent_id,
                previous_weight,
                new_weight,
                reason,
                ..
            } = event
            {
                debug!(
                    agent_id = %agent_id,
                    previous_weight,
                    new_weight,
                    reason = %reason,
                    "Weight changed"
                );
            }
            seen += 1;
        }
        seen
    });

    let samples = simulated::generate_samples(sim);
    let report = orchestrator
        .run_experiment(&samples)
        .await
        .context("Experiment failed")?;

    drop(orchestrator);
    drop(bus);
    let observed = watcher.await.unwrap_or(0);
    debug!(observed, "Weight update events observed");

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.summary());
    }
    Ok(())
}

async fn run_scenarios(config: &ConsensusConfig) -> Result<()> {
    let scenarios: [(&str, [(Label, f64); 4], Option<Label>); 3] = [
        (
            "three against one, no ground truth",
            [
                (Label::Spam, 0.92),
                (Label::Spam, 0.88),
                (Label::Spam, 0.95),
                (Label::Ham, 0.45),
            ],
            None,
        ),
        (
            "consensus correct, one dissenter",
            [
                (Label::Spam, 0.92),
                (Label::Spam, 0.88),
                (Label::Spam, 0.95),
                (Label::Ham, 0.45),
            ],
            Some(Label::Spam),
        ),
        (
            "consensus wrong, minority correct",
            [
                (Label::Spam, 0.90),
                (Label::Spam, 0.90),
                (Label::Spam, 0.90),
                (Label::Ham, 0.60),
            ],
            Some(Label::Ham),
        ),
    ];
    let agents = ["naive_bayes", "svm", "random_forest", "logistic_regression"];

    for (name, answers, truth) in scenarios {
        let orchestrator = ConsensusOrchestrator::new(
            config.clone(),
            MemoryStore::new().shared(),
            EventBus::new().shared(),
        )?;
        for (agent_id, (label, confidence)) in agents.iter().zip(answers) {
            orchestrator.add_classifier(Arc::new(
                ScriptedClassifier::fixed(*agent_id, label, confidence).with_model_kind(*agent_id),
            ))?;
        }

        let outcome = orchestrator
            .classify(&FeatureVector::default(), truth)
            .await
            .with_context(|| format!("Scenario '{name}' failed"))?;

        println!("== {name}");
        println!("   {}", outcome.result.explanation());
        match truth {
            Some(label) => println!("   ground truth: {label}"),
            None => println!("   ground truth: unknown"),
        }
        for (agent_id, weight) in orchestrator.weights()? {
            println!("   {agent_id:<20} {weight:.4}");
        }
    }
    Ok(())
}
