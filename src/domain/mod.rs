//! Domain layer: chat messages, topics, the topic registry, and
//! per-connection membership.
//!
//! Everything here is transport-agnostic. The registry is the only state
//! shared between connections.

pub mod chat_message;
pub mod connection_id;
pub mod membership;
pub mod topic;
pub mod topic_registry;

pub use chat_message::{ChatMessage, MessageType, SYSTEM_SENDER};
pub use connection_id::ConnectionId;
pub use membership::{Membership, MembershipPolicy, SessionMembership};
pub use topic::Topic;
pub use topic_registry::{Delivery, Outbox, TopicRegistry};
