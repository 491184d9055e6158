//! RocksDB-backed consensus store
//!
//! Provides durable storage with column families for logical data separation.
//! Values are stored as JSON so rows stay inspectable with `ldb`.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::{
    apply_transition, ConsensusStore, ReputationRound, SharedStore, StoreError, StoreResult,
};
use crate::types::{Agent, ClassificationPhase, Label, ProblemRecord, Vote, WeightUpdateEvent};

/// RocksDB-backed persistent store
///
/// Reads share the lock; check-then-write operations (uniqueness checks,
/// write-once outcomes, phase transitions) take it exclusively.
pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared, type-erased handle to this store
    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn put_in<T: Serialize>(db: &DB, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), Self::encode(value)?)?;
        Ok(())
    }

    fn get_in<T: DeserializeOwned>(db: &DB, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn batch_put<T: Serialize>(
        db: &DB,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        batch.put_cf(&cf, key.as_bytes(), Self::encode(value)?);
        Ok(())
    }

    /// All values whose key starts with `prefix`, in key order
    fn scan_in<T: DeserializeOwned>(db: &DB, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        for item in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            values.push(Self::decode(&value)?);
        }
        Ok(values)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, DB>> {
        self.db.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, DB>> {
        self.db.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ConsensusStore for RocksStore {
    fn put_agent(&self, agent: &Agent) -> StoreResult<()> {
        let db = self.read()?;
        Self::put_in(&db, schema::CF_AGENTS, &schema::keys::agent(&agent.agent_id), agent)
    }

    fn get_agent(&self, agent_id: &str) -> StoreResult<Option<Agent>> {
        let db = self.read()?;
        Self::get_in(&db, schema::CF_AGENTS, &schema::keys::agent(agent_id))
    }

    fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let db = self.read()?;
        let mut agents: Vec<Agent> = Self::scan_in(&db, schema::CF_AGENTS, "agent:")?;
        agents.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(agents)
    }

    fn insert_vote(&self, vote: &Vote) -> StoreResult<()> {
        let db = self.write()?;
        let key = schema::keys::vote(&vote.problem_id, &vote.agent_id);
        if Self::get_in::<Vote>(&db, schema::CF_VOTES, &key)?.is_some() {
            return Err(StoreError::DuplicateVote {
                problem_id: vote.problem_id.clone(),
                agent_id: vote.agent_id.clone(),
            });
        }
        Self::put_in(&db, schema::CF_VOTES, &key, vote)
    }

    fn resolve_vote(
        &self,
        problem_id: &str,
        agent_id: &str,
        is_correct: bool,
    ) -> StoreResult<()> {
        let db = self.write()?;
        let key = schema::keys::vote(problem_id, agent_id);
        let mut vote: Vote = Self::get_in(&db, schema::CF_VOTES, &key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if vote.is_correct.is_some() {
            return Err(StoreError::OutcomeAlreadySet {
                problem_id: problem_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        vote.is_correct = Some(is_correct);
        Self::put_in(&db, schema::CF_VOTES, &key, &vote)
    }

    fn votes_for(&self, problem_id: &str) -> StoreResult<Vec<Vote>> {
        let db = self.read()?;
        let mut votes: Vec<Vote> =
            Self::scan_in(&db, schema::CF_VOTES, &schema::keys::vote_prefix(problem_id))?;
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at));
        Ok(votes)
    }

    fn insert_problem(&self, record: &ProblemRecord) -> StoreResult<()> {
        let db = self.write()?;
        let key = schema::keys::problem(record.problem_id());
        if Self::get_in::<ProblemRecord>(&db, schema::CF_PROBLEMS, &key)?.is_some() {
            return Err(StoreError::DuplicateProblem(record.problem_id().to_string()));
        }
        Self::put_in(&db, schema::CF_PROBLEMS, &key, record)
    }

    fn get_problem(&self, problem_id: &str) -> StoreResult<Option<ProblemRecord>> {
        let db = self.read()?;
        Self::get_in(&db, schema::CF_PROBLEMS, &schema::keys::problem(problem_id))
    }

    fn transition_problem(
        &self,
        problem_id: &str,
        next: ClassificationPhase,
        ground_truth: Option<Label>,
    ) -> StoreResult<ProblemRecord> {
        let db = self.write()?;
        let key = schema::keys::problem(problem_id);
        let mut record: ProblemRecord = Self::get_in(&db, schema::CF_PROBLEMS, &key)?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        apply_transition(&mut record, next, ground_truth)?;
        Self::put_in(&db, schema::CF_PROBLEMS, &key, &record)?;
        Ok(record)
    }

    fn recent_problems(&self, limit: usize) -> StoreResult<Vec<ProblemRecord>> {
        let db = self.read()?;
        let mut records: Vec<ProblemRecord> = Self::scan_in(&db, schema::CF_PROBLEMS, "problem:")?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    fn append_weight_event(&self, event: &WeightUpdateEvent) -> StoreResult<()> {
        let db = self.read()?;
        let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(0);
        let key = schema::keys::weight_event(nanos, &uuid::Uuid::new_v4().to_string());
        Self::put_in(&db, schema::CF_WEIGHT_EVENTS, &key, event)
    }

    fn weight_events(&self, agent_id: Option<&str>) -> StoreResult<Vec<WeightUpdateEvent>> {
        let db = self.read()?;
        let events: Vec<WeightUpdateEvent> = Self::scan_in(&db, schema::CF_WEIGHT_EVENTS, "wevt:")?;
        Ok(events
            .into_iter()
            .filter(|e| agent_id.map_or(true, |id| e.agent_id == id))
            .collect())
    }

    fn commit_round(&self, round: &ReputationRound) -> StoreResult<()> {
        let db = self.write()?;
        let mut batch = WriteBatch::default();

        if round.claim {
            let key = schema::keys::problem(&round.problem_id);
            let mut record: ProblemRecord = Self::get_in(&db, schema::CF_PROBLEMS, &key)?
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            apply_transition(
                &mut record,
                ClassificationPhase::ReputationUpdated,
                Some(round.ground_truth),
            )?;
            Self::batch_put(&db, &mut batch, schema::CF_PROBLEMS, &key, &record)?;
        }

        for (agent_id, is_correct) in &round.outcomes {
            let key = schema::keys::vote(&round.problem_id, agent_id);
            let mut vote: Vote = Self::get_in(&db, schema::CF_VOTES, &key)?
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if vote.is_correct.is_some() {
                return Err(StoreError::OutcomeAlreadySet {
                    problem_id: round.problem_id.clone(),
                    agent_id: agent_id.clone(),
                });
            }
            vote.is_correct = Some(*is_correct);
            Self::batch_put(&db, &mut batch, schema::CF_VOTES, &key, &vote)?;
        }

        for agent in &round.agents {
            let key = schema::keys::agent(&agent.agent_id);
            Self::batch_put(&db, &mut batch, schema::CF_AGENTS, &key, agent)?;
        }

        for (index, event) in round.events.iter().enumerate() {
            let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(0);
            let suffix = format!("{:04}:{}", index, uuid::Uuid::new_v4());
            let key = schema::keys::weight_event(nanos, &suffix);
            Self::batch_put(&db, &mut batch, schema::CF_WEIGHT_EVENTS, &key, event)?;
        }

        db.write(batch)?;
        Ok(())
    }
}
