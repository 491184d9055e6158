//! Column family and key layout for persistent stores

/// Column family for agent reputation rows
pub const CF_AGENTS: &str = "agents";

/// Column family for votes
pub const CF_VOTES: &str = "votes";

/// Column family for problem records
pub const CF_PROBLEMS: &str = "problems";

/// Column family for weight update events
pub const CF_WEIGHT_EVENTS: &str = "weight_events";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_AGENTS, CF_VOTES, CF_PROBLEMS, CF_WEIGHT_EVENTS];

/// Key prefixes for compound keys
pub mod keys {
    /// Agent key
    pub fn agent(agent_id: &str) -> String {
        format!("agent:{}", agent_id)
    }

    /// Prefix shared by every vote on a problem
    pub fn vote_prefix(problem_id: &str) -> String {
        format!("vote:{}:", problem_id)
    }

    /// Vote key (problem + agent); uniqueness of the pair is uniqueness of the key
    pub fn vote(problem_id: &str, agent_id: &str) -> String {
        format!("vote:{}:{}", problem_id, agent_id)
    }

    /// Problem key
    pub fn problem(problem_id: &str) -> String {
        format!("problem:{}", problem_id)
    }

    /// Weight event key, ordered by timestamp then a unique suffix
    pub fn weight_event(timestamp_nanos: i64, event_id: &str) -> String {
        format!("wevt:{:020}:{}", timestamp_nanos, event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn test_vote_key_shares_problem_prefix() {
        let key = keys::vote("p-1", "svm");
        assert!(key.starts_with(&keys::vote_prefix("p-1")));
        assert!(!key.starts_with(&keys::vote_prefix("p-10")));
    }

    #[test]
    fn test_weight_event_keys_sort_chronologically() {
        let earlier = keys::weight_event(999, "b");
        let later = keys::weight_event(1_000, "a");
        assert!(earlier < later);
    }
}
