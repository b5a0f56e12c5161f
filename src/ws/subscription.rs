//! Per-connection subscription table.
//!
//! STOMP clients name each subscription with an `id` header. The table maps
//! those ids to topics so `UNSUBSCRIBE` can find its topic and every
//! subscription on a topic gets its own `MESSAGE` frame.

use std::collections::BTreeMap;

use crate::domain::Topic;

/// Subscription ids of a single WebSocket connection.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_id: BTreeMap<String, Topic>,
}

impl SubscriptionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records subscription `id` on `topic`, returning the topic it
    /// previously pointed at, if any.
    pub fn subscribe(&mut self, id: &str, topic: Topic) -> Option<Topic> {
        self.by_id.insert(id.to_string(), topic)
    }

    /// Drops subscription `id`, returning its topic.
    pub fn unsubscribe(&mut self, id: &str) -> Option<Topic> {
        self.by_id.remove(id)
    }

    /// Returns `true` if any subscription id still targets `topic`.
    #[must_use]
    pub fn targets(&self, topic: &Topic) -> bool {
        self.by_id.values().any(|t| t == topic)
    }

    /// Returns every subscription id on `topic`, in id order.
    pub fn ids_for<'a>(&'a self, topic: &'a Topic) -> impl Iterator<Item = &'a str> + 'a {
        self.by_id
            .iter()
            .filter(move |(_, t)| *t == topic)
            .map(|(id, _)| id.as_str())
    }
}
