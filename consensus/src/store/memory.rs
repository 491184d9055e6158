//! In-memory store backend

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::{
    apply_transition, ConsensusStore, ReputationRound, SharedStore, StoreError, StoreResult,
};
use crate::types::{
    Agent, AgentId, ClassificationPhase, Label, ProblemId, ProblemRecord, Vote,
    WeightUpdateEvent,
};

#[derive(Default)]
struct Inner {
    agents: HashMap<AgentId, Agent>,
    votes: BTreeMap<(ProblemId, AgentId), Vote>,
    problems: HashMap<ProblemId, ProblemRecord>,
    /// Insertion order of problems
    problem_order: Vec<ProblemId>,
    weight_events: Vec<WeightUpdateEvent>,
}

/// Process-local [`ConsensusStore`] backed by maps behind one `RwLock`
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared, type-erased handle to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ConsensusStore for MemoryStore {
    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        self.write()?
            .agents
            .insert(agent.agent_id.clone(), agent.clone());
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        Ok(self.read()?.agents.get(agent_id).cloned())
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.read()?.agents.values().cloned().collect();
        agents.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    fn insert_vote(&self, vote: &Vote) -> StoreResult<()> {
        let mut inner = self.write()?;
        let key = (vote.problem_id.clone(), vote.agent_id.clone());
        if inner.votes.contains_key(&key) {
            return Err(StoreError::DuplicateVote {
                problem_id: vote.problem_id.clone(),
                agent_id: vote.agent_id.clone(),
            });
        }
        inner.votes.insert(key, vote.clone());
        Ok(())
    }

    fn resolve_vote(
        &self,
        problem_id: &str,
        agent_id: &str,
        is_correct: bool,
    ) -> StoreResult<()> {
        let mut inner = self.write()?;
        let key = (problem_id.to_string(), agent_id.to_string());
        let vote = inner
            .votes
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("vote {problem_id}/{agent_id}")))?;

        if vote.is_correct.is_some() {
            return Err(StoreError::OutcomeAlreadySet {
                problem_id: problem_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        vote.is_correct = Some(is_correct);
        Ok(())
    }

    fn votes_for(&self, problem_id: &str) -> StoreResult<Vec<Vote>> {
        let inner = self.read()?;
        let mut votes: Vec<Vote> = inner
            .votes
            .iter()
            .filter(|((pid, _), _)| pid == problem_id)
            .map(|(_, vote)| vote.clone())
            .collect();
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at));
        Ok(votes)
    }

    fn insert_problem(&self, record: &ProblemRecord) -> StoreResult<()> {
        let mut inner = self.write()?;
        let id = record.problem_id().to_string();
        if inner.problems.contains_key(&id) {
            return Err(StoreError::DuplicateProblem(id));
        }
        inner.problem_order.push(id.clone());
        inner.problems.insert(id, record.clone());
        Ok(())
    }

    fn get_problem(&self, problem_id: &str) -> StoreResult<Option<ProblemRecord>> {
        Ok(self.read()?.problems.get(problem_id).cloned())
    }

    fn transition_problem(
        &self,
        problem_id: &str,
        next: ClassificationPhase,
        ground_truth: Option<Label>,
    ) -> StoreResult<ProblemRecord> {
        let mut inner = self.write()?;
        let record = inner
            .problems
            .get_mut(problem_id)
            .ok_or_else(|| StoreError::NotFound(format!("problem {problem_id}")))?;
        apply_transition(record, next, ground_truth)?;
        Ok(record.clone())
    }

    fn recent_problems(&self, limit: usize) -> StoreResult<Vec<ProblemRecord>> {
        let inner = self.read()?;
        Ok(inner
            .problem_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.problems.get(id).cloned())
            .collect())
    }

    fn append_weight_event(&self, event: &WeightUpdateEvent) -> StoreResult<()> {
        self.write()?.weight_events.push(event.clone());
        Ok(())
    }

    fn weight_events(&self, agent_id: Option<&str>) -> StoreResult<Vec<WeightUpdateEvent>> {
        let inner = self.read()?;
        Ok(inner
            .weight_events
            .iter()
            .filter(|e| agent_id.map_or(true, |id| e.agent_id == id))
            .cloned()
            .collect())
    }

    fn commit_round(&self, round: &ReputationRound) -> StoreResult<()> {
        let mut inner = self.write()?;

        let claimed = if round.claim {
            let mut record = inner
                .problems
                .get(&round.problem_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("problem {}", round.problem_id)))?;
            apply_transition(
                &mut record,
                ClassificationPhase::ReputationUpdated,
                Some(round.ground_truth),
            )?;
            Some(record)
        } else {
            None
        };

        for (agent_id, _) in &round.outcomes {
            let key = (round.problem_id.clone(), agent_id.clone());
            match inner.votes.get(&key) {
                None => {
                    return Err(StoreError::NotFound(format!(
                        "vote {}/{}",
                        round.problem_id, agent_id
                    )))
                }
                Some(vote) if vote.is_correct.is_some() => {
                    return Err(StoreError::OutcomeAlreadySet {
                        problem_id: round.problem_id.clone(),
                        agent_id: agent_id.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        // Checks passed; nothing below can fail
        for (agent_id, is_correct) in &round.outcomes {
            let key = (round.problem_id.clone(), agent_id.clone());
            if let Some(vote) = inner.votes.get_mut(&key) {
                vote.is_correct = Some(*is_correct);
            }
        }
        for agent in &round.agents {
            inner.agents.insert(agent.agent_id.clone(), agent.clone());
        }
        inner.weight_events.extend(round.events.iter().cloned());
        if let Some(record) = claimed {
            inner.problems.insert(round.problem_id.clone(), record);
        }
        Ok(())
    }
}
