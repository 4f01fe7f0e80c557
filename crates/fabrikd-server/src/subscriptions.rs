//! Subscriber set management
//!
//! Three sets of connection ids, one per broadcast topic. Subscribing is
//! idempotent and unsubscribing is best-effort: absence is never an error.

use fabrikd_core::state::{ConnectionId, Topic, TopicSelector};
use std::collections::HashSet;

/// The three per-topic subscriber sets
#[derive(Debug, Default)]
pub struct SubscriptionSets {
    temperature: HashSet<ConnectionId>,
    info: HashSet<ConnectionId>,
    raw: HashSet<ConnectionId>,
}

impl SubscriptionSets {
    fn set_mut(&mut self, topic: Topic) -> &mut HashSet<ConnectionId> {
        match topic {
            Topic::Temperature => &mut self.temperature,
            Topic::Info => &mut self.info,
            Topic::Raw => &mut self.raw,
        }
    }

    fn set(&self, topic: Topic) -> &HashSet<ConnectionId> {
        match topic {
            Topic::Temperature => &self.temperature,
            Topic::Info => &self.info,
            Topic::Raw => &self.raw,
        }
    }

    /// Add a connection to the selected set(s); already-present is a no-op
    pub fn subscribe(&mut self, id: ConnectionId, selector: TopicSelector) {
        for &topic in selector.topics() {
            self.set_mut(topic).insert(id);
        }
    }

    /// Remove a connection from the selected set(s); absence is a no-op
    pub fn unsubscribe(&mut self, id: ConnectionId, selector: TopicSelector) {
        for &topic in selector.topics() {
            self.set_mut(topic).remove(&id);
        }
    }

    /// Remove a connection from every set (connection teardown)
    pub fn remove_everywhere(&mut self, id: ConnectionId) {
        self.unsubscribe(id, TopicSelector::All);
    }

    /// Whether a connection is subscribed to a topic
    pub fn is_member(&self, id: ConnectionId, topic: Topic) -> bool {
        self.set(topic).contains(&id)
    }

    /// Snapshot of one topic's members
    pub fn members(&self, topic: Topic) -> Vec<ConnectionId> {
        self.set(topic).iter().copied().collect()
    }

    /// Total membership count across all sets
    pub fn len(&self) -> usize {
        self.temperature.len() + self.info.len() + self.raw.len()
    }

    /// Whether every set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
