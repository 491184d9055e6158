//! Agent registry - reputation records for every classifier in the pool
//!
//! The registry is the only writer of agent weights. Each agent lives in its
//! own `Mutex` cell so updates to one agent are serialized while updates to
//! different agents proceed in parallel; the outer map lock is only held long
//! enough to find the cell (or, on registration, to insert one).
//!
//! Every mutation is written through to the [`ConsensusStore`] before it
//! becomes visible in memory, so a failed write leaves the old value intact.
//! [`AgentRegistry::record_outcomes`] extends this to a whole round: all the
//! agents involved stay locked until the caller's commit succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, ConsensusConfig};
use crate::store::{SharedStore, StoreError};
use crate::types::{Agent, AgentId, UpdateReason};

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Weight {weight} for agent {agent_id} outside [{min}, {max}]")]
    WeightOutOfBounds {
        agent_id: String,
        weight: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid weight or multiplier: {0}")]
    InvalidWeight(f64),

    #[error("Agent {0} appears twice in one round")]
    DuplicateOutcome(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Shared reference to AgentRegistry
pub type SharedAgentRegistry = Arc<AgentRegistry>;

/// Before/after view of one weight mutation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightChange {
    pub previous_weight: f64,
    pub new_weight: f64,
}

/// One agent's share of a reputation round
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeUpdate {
    pub agent_id: AgentId,
    pub reason: UpdateReason,
    pub multiplier: f64,
    pub confidence: f64,
}

/// An [`OutcomeUpdate`] computed but not yet visible to readers
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOutcome {
    /// The agent record as it will be once committed
    pub agent: Agent,
    pub reason: UpdateReason,
    pub change: WeightChange,
}

type AgentCell = Arc<Mutex<Agent>>;

#[derive(Default)]
struct Slots {
    cells: HashMap<AgentId, AgentCell>,
    /// Registration order
    order: Vec<AgentId>,
}

/// Registry of agent reputation records
pub struct AgentRegistry {
    slots: RwLock<Slots>,
    config: ConsensusConfig,
    store: SharedStore,
}

impl AgentRegistry {
    /// Create an empty registry writing through to `store`
    pub fn new(store: SharedStore, config: ConsensusConfig) -> RegistryResult<Self> {
        config.validate()?;
        Ok(Self {
            slots: RwLock::new(Slots::default()),
            config,
            store,
        })
    }

    /// Rebuild a registry from the agents already persisted in `store`
    ///
    /// A persisted weight outside the configured bounds means something wrote
    /// around the registry; loading fails rather than trusting it.
    pub fn load(store: SharedStore, config: ConsensusConfig) -> RegistryResult<Self> {
        let registry = Self::new(store, config)?;
        let agents = registry.store.list_agents()?;

        {
            let mut slots = registry.slots_mut()?;
            for agent in agents {
                registry.check_bounds(&agent.agent_id, agent.weight)?;
                slots.order.push(agent.agent_id.clone());
                slots
                    .cells
                    .insert(agent.agent_id.clone(), Arc::new(Mutex::new(agent)));
            }
            info!(agents = slots.order.len(), "Agent registry loaded");
        }

        Ok(registry)
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedAgentRegistry {
        Arc::new(self)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an agent; returns `false` when it was already known
    ///
    /// Re-registration never touches weight or counters. An agent that exists
    /// only in the store (e.g. after a restart) is adopted as persisted.
    pub fn register(&self, agent_id: &str, model_kind: &str) -> RegistryResult<bool> {
        let mut slots = self.slots_mut()?;
        if slots.cells.contains_key(agent_id) {
            debug!(agent_id, "Agent already registered");
            return Ok(false);
        }

        let agent = match self.store.get_agent(agent_id)? {
            Some(persisted) => {
                self.check_bounds(agent_id, persisted.weight)?;
                debug!(agent_id, weight = persisted.weight, "Adopted persisted agent");
                persisted
            }
            None => {
                let agent = Agent::new(agent_id, model_kind, self.config.initial_weight);
                self.store.put_agent(&agent)?;
                agent
            }
        };

        slots.order.push(agent_id.to_string());
        slots
            .cells
            .insert(agent_id.to_string(), Arc::new(Mutex::new(agent)));

        info!(agent_id, model_kind, "Agent registered");
        Ok(true)
    }

    pub fn contains(&self, agent_id: &str) -> RegistryResult<bool> {
        Ok(self.slots_ref()?.cells.contains_key(agent_id))
    }

    /// Registered agent ids in registration order
    pub fn agent_ids(&self) -> RegistryResult<Vec<AgentId>> {
        Ok(self.slots_ref()?.order.clone())
    }

    pub fn len(&self) -> RegistryResult<usize> {
        Ok(self.slots_ref()?.order.len())
    }

    pub fn is_empty(&self) -> RegistryResult<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current weight of an agent
    pub fn get_weight(&self, agent_id: &str) -> RegistryResult<f64> {
        let cell = self.cell(agent_id)?;
        let agent = Self::lock(&cell)?;
        Ok(agent.weight)
    }

    /// Snapshot of one agent record
    pub fn get(&self, agent_id: &str) -> RegistryResult<Agent> {
        let cell = self.cell(agent_id)?;
        let agent = Self::lock(&cell)?;
        Ok(agent.clone())
    }

    /// Snapshot of every agent in registration order
    pub fn agents(&self) -> RegistryResult<Vec<Agent>> {
        let cells: Vec<AgentCell> = {
            let slots = self.slots_ref()?;
            slots
                .order
                .iter()
                .filter_map(|id| slots.cells.get(id).cloned())
                .collect()
        };

        cells
            .iter()
            .map(|cell| Self::lock(cell).map(|agent| agent.clone()))
            .collect()
    }

    /// Current weights in registration order
    pub fn weights(&self) -> RegistryResult<Vec<(AgentId, f64)>> {
        Ok(self
            .agents()?
            .into_iter()
            .map(|a| (a.agent_id, a.weight))
            .collect())
    }

    /// Agents sorted by weight, heaviest first
    pub fn rank_by_weight(&self) -> RegistryResult<Vec<(AgentId, f64)>> {
        let mut ranked = self.weights()?;
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }

    /// Agents sorted by accuracy, best first; agents without resolved votes last
    pub fn rank_by_accuracy(&self) -> RegistryResult<Vec<(AgentId, Option<f64>)>> {
        let mut ranked: Vec<(AgentId, Option<f64>)> = self
            .agents()?
            .into_iter()
            .map(|a| {
                let accuracy = a.accuracy();
                (a.agent_id, accuracy)
            })
            .collect();
        ranked.sort_by(|a, b| match (a.1, b.1) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(ranked)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Multiply an agent's weight, clamp it into bounds, and return the new weight
    pub fn apply_weight_delta(&self, agent_id: &str, multiplier: f64) -> RegistryResult<f64> {
        self.mutate(agent_id, multiplier, |_| {})
            .map(|change| change.new_weight)
    }

    /// Apply a reputation multiplier and the lifetime counters for one resolved vote
    ///
    /// Both happen under the agent's lock so readers never observe one
    /// without the other.
    pub fn record_outcome(
        &self,
        agent_id: &str,
        reason: UpdateReason,
        multiplier: f64,
        confidence: f64,
    ) -> RegistryResult<WeightChange> {
        self.mutate(agent_id, multiplier, |agent| agent.record(reason, confidence))
    }

    /// Apply one outcome per agent as a single round
    ///
    /// Every agent's new record is staged under its lock (cells are locked in
    /// id order), then handed to `commit`. Only when `commit` succeeds do the
    /// staged records become visible; on error nothing changes in memory.
    pub fn record_outcomes<T, E>(
        &self,
        updates: &[OutcomeUpdate],
        commit: impl FnOnce(&[StagedOutcome]) -> Result<T, E>,
    ) -> Result<(Vec<StagedOutcome>, T), E>
    where
        E: From<RegistryError>,
    {
        for update in updates {
            if !update.multiplier.is_finite() || update.multiplier <= 0.0 {
                return Err(RegistryError::InvalidWeight(update.multiplier).into());
            }
        }

        let mut lock_order: Vec<usize> = (0..updates.len()).collect();
        lock_order.sort_by(|&a, &b| updates[a].agent_id.cmp(&updates[b].agent_id));
        for pair in lock_order.windows(2) {
            if updates[pair[0]].agent_id == updates[pair[1]].agent_id {
                return Err(
                    RegistryError::DuplicateOutcome(updates[pair[0]].agent_id.clone()).into(),
                );
            }
        }

        let cells = lock_order
            .iter()
            .map(|&i| self.cell(&updates[i].agent_id))
            .collect::<RegistryResult<Vec<AgentCell>>>()?;
        let mut guards = Vec::with_capacity(cells.len());
        for cell in &cells {
            guards.push(Self::lock(cell)?);
        }

        // guard position of each update, by update index
        let mut slot_of = vec![0; updates.len()];
        for (slot, &index) in lock_order.iter().enumerate() {
            slot_of[index] = slot;
        }

        let mut staged = Vec::with_capacity(updates.len());
        for (index, update) in updates.iter().enumerate() {
            let current = &guards[slot_of[index]];
            let previous_weight = current.weight;
            let new_weight = self
                .config
                .clamp_weight(previous_weight * update.multiplier);
            self.check_bounds(&update.agent_id, new_weight)?;

            let mut agent = (**current).clone();
            agent.weight = new_weight;
            agent.record(update.reason, update.confidence);
            staged.push(StagedOutcome {
                agent,
                reason: update.reason,
                change: WeightChange {
                    previous_weight,
                    new_weight,
                },
            });
        }

        let committed = commit(&staged)?;

        for (index, outcome) in staged.iter().enumerate() {
            *guards[slot_of[index]] = outcome.agent.clone();
        }
        debug!(agents = staged.len(), "Outcome round committed");
        Ok((staged, committed))
    }

    /// Set an agent's weight directly (clamped into bounds)
    pub fn set_weight(&self, agent_id: &str, weight: f64) -> RegistryResult<WeightChange> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RegistryError::InvalidWeight(weight));
        }

        let cell = self.cell(agent_id)?;
        let mut agent = Self::lock(&cell)?;

        let previous_weight = agent.weight;
        let mut updated = agent.clone();
        updated.weight = self.config.clamp_weight(weight);
        updated.touch();
        self.store.put_agent(&updated)?;
        *agent = updated;

        info!(agent_id, previous_weight, new_weight = agent.weight, "Weight set");
        Ok(WeightChange {
            previous_weight,
            new_weight: agent.weight,
        })
    }

    /// Reset every weight to the initial weight; counters are left untouched
    pub fn reset_all(&self) -> RegistryResult<usize> {
        let cells: Vec<AgentCell> = self.slots_ref()?.cells.values().cloned().collect();

        for cell in &cells {
            let mut agent = Self::lock(cell)?;
            let mut updated = agent.clone();
            updated.weight = self.config.initial_weight;
            updated.touch();
            self.store.put_agent(&updated)?;
            *agent = updated;
        }

        info!(
            agents = cells.len(),
            weight = self.config.initial_weight,
            "All agent weights reset"
        );
        Ok(cells.len())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn mutate(
        &self,
        agent_id: &str,
        multiplier: f64,
        extra: impl FnOnce(&mut Agent),
    ) -> RegistryResult<WeightChange> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(RegistryError::InvalidWeight(multiplier));
        }

        let cell = self.cell(agent_id)?;
        let mut agent = Self::lock(&cell)?;

        let previous_weight = agent.weight;
        let new_weight = self.config.clamp_weight(previous_weight * multiplier);
        self.check_bounds(agent_id, new_weight)?;

        let mut updated = agent.clone();
        updated.weight = new_weight;
        updated.touch();
        extra(&mut updated);
        self.store.put_agent(&updated)?;
        *agent = updated;

        debug!(agent_id, previous_weight, new_weight, multiplier, "Weight updated");
        Ok(WeightChange {
            previous_weight,
            new_weight,
        })
    }

    fn check_bounds(&self, agent_id: &str, weight: f64) -> RegistryResult<()> {
        if self.config.weight_in_bounds(weight) {
            Ok(())
        } else {
            Err(RegistryError::WeightOutOfBounds {
                agent_id: agent_id.to_string(),
                weight,
                min: self.config.weight_min,
                max: self.config.weight_max,
            })
        }
    }

    fn cell(&self, agent_id: &str) -> RegistryResult<AgentCell> {
        self.slots_ref()?
            .cells
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAgent(agent_id.to_string()))
    }

    fn lock(cell: &AgentCell) -> RegistryResult<MutexGuard<'_, Agent>> {
        cell.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn slots_ref(&self) -> RegistryResult<std::sync::RwLockReadGuard<'_, Slots>> {
        self.slots.read().map_err(|_| RegistryError::LockPoisoned)
    }

    fn slots_mut(&self) -> RegistryResult<std::sync::RwLockWriteGuard<'_, Slots>> {
        self.slots.write().map_err(|_| RegistryError::LockPoisoned)
    }
}
