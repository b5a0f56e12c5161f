//! Topic registry and broadcaster.
//!
//! [`TopicRegistry`] maps each [`Topic`] to the set of connections currently
//! subscribed to it. Every connection registers the sending half of its own
//! bounded outbound queue; [`TopicRegistry::publish`] pushes one
//! [`Delivery`] into each queue of the topic's subscriber set.
//!
//! # Concurrency
//!
//! - The outer map is a `RwLock<HashMap<...>>`; each subscriber set sits
//!   behind its own `Arc<RwLock<...>>`, so publishes to different topics
//!   never contend on the same lock.
//! - A publish holds the topic's read lock for the whole fan-out, which makes
//!   the delivered set exactly the snapshot of subscribers at call time.
//! - Subscribe and unsubscribe take the outer write lock before the topic's
//!   write lock. Empty topics are dropped from the map under that same lock.
//! - Sends never await: a full or closed queue drops that one delivery.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{ChatMessage, ConnectionId, Topic};

/// One message addressed to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message was published to.
    pub topic: Topic,
    /// Shared message payload.
    pub message: Arc<ChatMessage>,
}

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Delivery>;

type Subscribers = HashMap<ConnectionId, Outbox>;

/// Concurrency-safe registry of topic subscriptions.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<Topic, Arc<RwLock<Subscribers>>>>,
}

impl TopicRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` to the subscriber set of `topic`, creating the topic
    /// on first use.
    ///
    /// Returns `false` if the connection was already subscribed, in which
    /// case its existing outbox is kept and nothing changes.
    pub async fn subscribe(&self, connection: ConnectionId, topic: &Topic, outbox: Outbox) -> bool {
        let mut map = self.topics.write().await;
        let entry = Arc::clone(map.entry(topic.clone()).or_default());
        let mut subscribers = entry.write().await;
        if subscribers.contains_key(&connection) {
            return false;
        }
        subscribers.insert(connection, outbox);
        tracing::debug!(%connection, %topic, count = subscribers.len(), "subscribed");
        true
    }

    /// Removes `connection` from the subscriber set of `topic`.
    ///
    /// Returns `true` if the connection was subscribed.
    pub async fn unsubscribe(&self, connection: ConnectionId, topic: &Topic) -> bool {
        let mut map = self.topics.write().await;
        let Some(entry) = map.get(topic).map(Arc::clone) else {
            return false;
        };
        let mut subscribers = entry.write().await;
        let removed = subscribers.remove(&connection).is_some();
        if subscribers.is_empty() {
            map.remove(topic);
        }
        if removed {
            tracing::debug!(%connection, %topic, "unsubscribed");
        }
        removed
    }

    /// Removes `connection` from every topic. Called when a socket closes.
    ///
    /// Returns the number of topics the connection was removed from.
    pub async fn disconnect(&self, connection: ConnectionId) -> usize {
        let mut map = self.topics.write().await;
        let mut removed = 0usize;
        let mut emptied = Vec::new();
        for (topic, entry) in map.iter() {
            let mut subscribers = entry.write().await;
            if subscribers.remove(&connection).is_some() {
                removed = removed.saturating_add(1);
            }
            if subscribers.is_empty() {
                emptied.push(topic.clone());
            }
        }
        for topic in &emptied {
            map.remove(topic);
        }
        tracing::debug!(%connection, topics = removed, "connection removed from registry");
        removed
    }

    /// Delivers `message` to every connection subscribed to `topic` at the
    /// moment of the call.
    ///
    /// Delivery is best-effort: a subscriber whose queue is full or closed
    /// misses this message and the others are unaffected. Returns the number
    /// of subscribers that accepted the delivery.
    pub async fn publish(&self, topic: &Topic, message: ChatMessage) -> usize {
        let entry = {
            let map = self.topics.read().await;
            match map.get(topic) {
                Some(entry) => Arc::clone(entry),
                None => return 0,
            }
        };

        let message = Arc::new(message);
        let subscribers = entry.read().await;
        let mut delivered = 0usize;
        for (connection, outbox) in subscribers.iter() {
            let delivery = Delivery {
                topic: topic.clone(),
                message: Arc::clone(&message),
            };
            match outbox.try_send(delivery) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%connection, %topic, "outbound queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(%connection, %topic, "subscriber gone, dropping message");
                }
            }
        }
        delivered
    }

    /// Returns the number of connections subscribed to `topic`.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        let entry = {
            let map = self.topics.read().await;
            match map.get(topic) {
                Some(entry) => Arc::clone(entry),
                None => return 0,
            }
        };
        entry.read().await.len()
    }

    /// Returns the number of topics that currently have subscribers.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}
