//! Key-exchange bridge: relays the external service's log onto the chat
//! topic.
//!
//! One [`KeyExchangeBridge::run`] performs a single GET against the
//! key-exchange service, republishes every entry of the response's `log`
//! array as a `QKD_LOG` message in order, pausing between entries, and hands
//! the upstream body back to the caller byte for byte.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use serde_json::Value;

use crate::domain::{ChatMessage, Topic, TopicRegistry};

/// Upstream failures. Anything already relayed stays published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with a non-2xx status.
    #[error("service responded with status {0}")]
    Status(u16),

    /// The body is not JSON.
    #[error("response is not valid JSON: {0}")]
    Body(String),
}

/// Extracts the relayable lines from a key-exchange response.
///
/// Only a top-level `log` array counts; string entries are taken as-is and
/// any other JSON value is relayed as its JSON text.
#[must_use]
pub fn log_lines(body: &Value) -> Vec<String> {
    body.get("log")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| match entry {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Streams key-exchange logs into a topic.
#[derive(Debug, Clone)]
pub struct KeyExchangeBridge {
    client: reqwest::Client,
    url: String,
    pacing: Duration,
    registry: Arc<TopicRegistry>,
    topic: Topic,
}

impl KeyExchangeBridge {
    /// Creates a bridge calling `url` and publishing to `topic`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        pacing: Duration,
        registry: Arc<TopicRegistry>,
        topic: Topic,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            pacing,
            registry,
            topic,
        }
    }

    /// Runs one key exchange and relays its log. Returns the upstream body
    /// exactly as received; it is parsed only to find the log.
    ///
    /// Takes roughly `pacing × (lines - 1)` once the upstream has answered.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the service is unreachable, answers with
    /// a non-success status, or sends a body that is not JSON. Nothing is
    /// relayed in those cases.
    pub async fn run(&self) -> Result<Bytes, BridgeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BridgeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %self.url, "key-exchange service error");
            return Err(BridgeError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BridgeError::Request(e.to_string()))?;
        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| BridgeError::Body(e.to_string()))?;

        let lines = log_lines(&body);
        tracing::info!(lines = lines.len(), topic = %self.topic, "relaying key-exchange log");
        self.relay_log(lines).await;
        Ok(bytes)
    }

    /// Publishes `lines` as `QKD_LOG` messages in order, sleeping `pacing`
    /// between consecutive lines.
    ///
    /// Returns the number of lines published.
    pub async fn relay_log<I>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut published = 0usize;
        for line in lines {
            if published > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            let delivered = self.registry.publish(&self.topic, ChatMessage::log(line)).await;
            tracing::trace!(delivered, "relayed log line");
            published = published.saturating_add(1);
        }
        published
    }
}
