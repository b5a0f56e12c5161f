//! Chat message wire shape.
//!
//! Every payload that crosses the relay, whether produced by a client or by
//! the key-exchange bridge, is a [`ChatMessage`]:
//!
//! ```json
//! { "type": "CHAT", "content": "hi", "sender": "Alice" }
//! ```

use serde::{Deserialize, Serialize};

/// Sender name used for messages produced by the relay itself.
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// Discriminator for chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Ordinary chat line.
    Chat,
    /// A connection announced a display name.
    Join,
    /// A joined connection went away.
    Leave,
    /// Status line relayed from the key-exchange service.
    #[serde(rename = "QKD_LOG")]
    Log,
}

/// Immutable chat payload broadcast to topic subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Free-form text.
    #[serde(default)]
    pub content: String,
    /// Display name of the producer.
    #[serde(default)]
    pub sender: String,
}

impl ChatMessage {
    /// Builds a `CHAT` message.
    #[must_use]
    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Chat,
            content: content.into(),
            sender: sender.into(),
        }
    }

    /// Builds the `JOIN` announcement for `display_name`.
    #[must_use]
    pub fn join(display_name: &str) -> Self {
        Self {
            msg_type: MessageType::Join,
            content: format!("{display_name} has joined!"),
            sender: display_name.to_string(),
        }
    }

    /// Builds the `LEAVE` announcement for `display_name`.
    #[must_use]
    pub fn leave(display_name: &str) -> Self {
        Self {
            msg_type: MessageType::Leave,
            content: format!("{display_name} has left!"),
            sender: display_name.to_string(),
        }
    }

    /// Builds a `QKD_LOG` line sent by [`SYSTEM_SENDER`].
    #[must_use]
    pub fn log(content: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Log,
            content: content.into(),
            sender: SYSTEM_SENDER.to_string(),
        }
    }
}
