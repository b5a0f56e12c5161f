//! Chat service: destination routing and the chat handlers.
//!
//! Client `SEND` frames address `/app/<route>`. [`DestinationRouter`] maps
//! each route to a plain handler function; [`ChatService::dispatch`] parses
//! the payload, runs the handler against the caller's [`ChatSession`], and
//! publishes the result to the chat topic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::domain::{
    ChatMessage, ConnectionId, MembershipPolicy, MessageType, SessionMembership, Topic,
    TopicRegistry,
};

/// Destination prefix of application-bound messages.
pub const APP_PREFIX: &str = "/app";

/// Route that broadcasts a chat line.
pub const SEND_MESSAGE_ROUTE: &str = "/chat.sendMessage";

/// Route that records a display name and announces the join.
pub const ADD_USER_ROUTE: &str = "/chat.addUser";

/// Sender shown for chat lines from connections that never named themselves.
pub const ANONYMOUS_SENDER: &str = "Anonymous";

/// Failures of a single client message. The connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// No handler is mapped to the destination.
    #[error("no handler for destination: {0}")]
    UnknownDestination(String),

    /// The payload does not match the chat message wire shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// State of one client session that handlers may read or update.
#[derive(Debug)]
pub struct ChatSession {
    /// Connection the session belongs to.
    pub connection_id: ConnectionId,
    /// Authentication bound at admission.
    pub auth: AuthContext,
    /// Display name announced by a join event.
    pub membership: SessionMembership,
}

impl ChatSession {
    /// Creates a session that has not joined yet.
    #[must_use]
    pub fn new(connection_id: ConnectionId, auth: AuthContext) -> Self {
        Self {
            connection_id,
            auth,
            membership: SessionMembership::new(),
        }
    }
}

/// A destination handler: turns an inbound message into the message to
/// broadcast.
pub type ChatHandler =
    fn(&ChatService, &mut ChatSession, ChatMessage) -> Result<ChatMessage, ChatError>;

/// Explicit table from `/app` routes to handlers.
#[derive(Debug, Clone, Default)]
pub struct DestinationRouter {
    routes: HashMap<String, ChatHandler>,
}

impl DestinationRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `route` (e.g. `/chat.sendMessage`) to `handler`.
    #[must_use]
    pub fn route(mut self, route: &str, handler: ChatHandler) -> Self {
        self.routes.insert(route.to_string(), handler);
        self
    }

    /// Resolves a full destination such as `/app/chat.sendMessage`.
    #[must_use]
    pub fn resolve(&self, destination: &str) -> Option<ChatHandler> {
        let route = destination.strip_prefix(APP_PREFIX)?;
        self.routes.get(route).copied()
    }

    /// The relay's chat routes.
    #[must_use]
    pub fn chat_routes() -> Self {
        Self::new()
            .route(SEND_MESSAGE_ROUTE, send_message)
            .route(ADD_USER_ROUTE, add_user)
    }
}

fn send_message(
    service: &ChatService,
    session: &mut ChatSession,
    message: ChatMessage,
) -> Result<ChatMessage, ChatError> {
    if message.msg_type != MessageType::Chat {
        return Err(ChatError::MalformedMessage(format!(
            "{SEND_MESSAGE_ROUTE} expects a CHAT message"
        )));
    }
    // Joined sessions speak under their membership; others under the name
    // the policy allows, which is never the claim for a verified identity.
    let sender = match session.membership.display_name() {
        Some(name) => name.to_string(),
        None => {
            let resolved = service.policy.resolve_name(&message.sender, &session.auth);
            if resolved.is_empty() {
                ANONYMOUS_SENDER.to_string()
            } else {
                resolved
            }
        }
    };
    Ok(ChatMessage::chat(sender, message.content))
}

fn add_user(
    service: &ChatService,
    session: &mut ChatSession,
    message: ChatMessage,
) -> Result<ChatMessage, ChatError> {
    let membership = session
        .membership
        .join(&message.sender, &session.auth, service.policy)
        .ok_or_else(|| ChatError::MalformedMessage("display name is empty".to_string()))?;
    tracing::info!(
        connection_id = %session.connection_id,
        display_name = %membership.display_name,
        authenticated = session.auth.is_authenticated(),
        "user joined"
    );
    Ok(ChatMessage::join(&membership.display_name))
}

/// Routes client messages and announces membership changes on the chat
/// topic.
#[derive(Debug)]
pub struct ChatService {
    registry: Arc<TopicRegistry>,
    topic: Topic,
    policy: MembershipPolicy,
    router: DestinationRouter,
}

impl ChatService {
    /// Creates a service publishing to `topic` with the default chat routes.
    #[must_use]
    pub fn new(registry: Arc<TopicRegistry>, topic: Topic, policy: MembershipPolicy) -> Self {
        Self {
            registry,
            topic,
            policy,
            router: DestinationRouter::chat_routes(),
        }
    }

    /// Returns the shared topic registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Returns the chat topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Handles one application-bound message and publishes the result.
    ///
    /// Returns the number of subscribers that received the broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::UnknownDestination`] if no route matches and
    /// [`ChatError::MalformedMessage`] if the body is not a valid chat
    /// message or the handler rejects it.
    pub async fn dispatch(
        &self,
        session: &mut ChatSession,
        destination: &str,
        body: &str,
    ) -> Result<usize, ChatError> {
        let handler = self
            .router
            .resolve(destination)
            .ok_or_else(|| ChatError::UnknownDestination(destination.to_string()))?;
        let message: ChatMessage = serde_json::from_str(body)
            .map_err(|e| ChatError::MalformedMessage(e.to_string()))?;
        let outbound = handler(self, session, message)?;
        Ok(self.registry.publish(&self.topic, outbound).await)
    }

    /// Clears the session's membership and announces the departure.
    ///
    /// Returns `None` if the session never joined.
    pub async fn leave(&self, session: &mut ChatSession) -> Option<usize> {
        let membership = session.membership.leave()?;
        tracing::info!(
            connection_id = %session.connection_id,
            display_name = %membership.display_name,
            "user left"
        );
        let delivered = self
            .registry
            .publish(&self.topic, ChatMessage::leave(&membership.display_name))
            .await;
        Some(delivered)
    }
}
