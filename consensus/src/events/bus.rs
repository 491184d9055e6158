//! Event bus for consensus notifications
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and never
//! fails for lack of subscribers; durable audit records go through the store.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::ConsensusEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast event bus
pub struct EventBus {
    sender: broadcast::Sender<ConsensusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: ConsensusEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events matching a filter
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub problem_id: Option<String>,
    pub agent_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn problem(mut self, problem_id: &str) -> Self {
        self.problem_id = Some(problem_id.to_string());
        self
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    ///
    /// A problem or agent filter rejects events that carry no such id.
    pub fn matches(&self, event: &ConsensusEvent) -> bool {
        if let Some(ref pid) = self.problem_id {
            if event.problem_id() != Some(pid.as_str()) {
                return false;
            }
        }

        if let Some(ref aid) = self.agent_id {
            if event.agent_id() != Some(aid.as_str()) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Receiver that skips events not matching its filter
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<ConsensusEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Wait for the next matching event; lagged messages are skipped
    pub async fn recv(&mut self) -> Option<ConsensusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Filtered receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpdateReason;
    use chrono::Utc;

    fn weight_event(problem: &str, agent: &str) -> ConsensusEvent {
        ConsensusEvent::WeightUpdated {
            problem_id: problem.to_string(),
            agent_id: agent.to_string(),
            previous_weight: 1.0,
            new_weight: 0.9,
            reason: UpdateReason::DissentedWrong,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(weight_event("p1", "nb"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_filter_matching() {
        let filter = EventFilter::new().agent("nb").types(vec!["weight_updated"]);
        assert!(filter.matches(&weight_event("p1", "nb")));
        assert!(!filter.matches(&weight_event("p1", "svm")));

        let reset = ConsensusEvent::WeightsReset {
            agents: 4,
            timestamp: Utc::now(),
        };
        assert!(!filter.matches(&reset));
        assert!(EventFilter::new().matches(&reset));
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_others() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_filtered(EventFilter::new().problem("p2"));

        bus.publish(weight_event("p1", "nb"));
        bus.publish(weight_event("p2", "svm"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.problem_id(), Some("p2"));
        assert_eq!(event.agent_id(), Some("svm"));
    }
}
