//! Service layer: chat routing and the key-exchange bridge.
//!
//! [`ChatService`] turns client messages into broadcasts on the chat topic;
//! [`KeyExchangeBridge`] streams the external key-exchange log onto the same
//! topic. Both publish through the shared [`crate::domain::TopicRegistry`].

pub mod bridge;
pub mod chat_service;

pub use bridge::{BridgeError, KeyExchangeBridge};
pub use chat_service::{ChatError, ChatService, ChatSession, DestinationRouter};
