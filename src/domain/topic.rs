//! Broadcast topic names and their STOMP destinations.

use std::fmt;

/// Destination prefix of server-to-client broadcast topics.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Name of a broadcast channel, e.g. `public` for `/topic/public`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    /// Creates a topic from its bare name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parses a `/topic/<name>` destination. Returns `None` for any other
    /// prefix or an empty name.
    #[must_use]
    pub fn from_destination(destination: &str) -> Option<Self> {
        destination
            .strip_prefix(TOPIC_PREFIX)
            .filter(|name| !name.is_empty())
            .map(Self::new)
    }

    /// Returns the full `/topic/<name>` destination.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{TOPIC_PREFIX}{}", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
