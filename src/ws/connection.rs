//! WebSocket connection loop and STOMP session handling.
//!
//! Each socket runs [`run_connection`] in its own task. The loop reads
//! client frames and forwards deliveries from the connection's outbound
//! queue. When the socket goes away, for whatever reason, the connection is
//! removed from every topic and a `LEAVE` is announced if it had joined.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::subscription::SubscriptionTable;
use crate::app_state::AppState;
use crate::auth::AuthContext;
use crate::domain::{ConnectionId, Delivery, Outbox, Topic};
use crate::service::{ChatError, ChatSession};
use crate::stomp::{Command, Frame, STOMP_VERSION, is_heartbeat};

/// Frames to send back and whether to close afterwards.
#[derive(Debug, Default)]
pub struct Reply {
    /// Frames for the client, in order.
    pub frames: Vec<Frame>,
    /// Close the socket once the frames are sent.
    pub close: bool,
}

impl Reply {
    fn frame(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }

    fn none() -> Self {
        Self::default()
    }
}

/// STOMP-level state of one connection.
#[derive(Debug)]
pub struct StompSession {
    chat: ChatSession,
    connected: bool,
    subscriptions: SubscriptionTable,
    outbox: Outbox,
}

impl StompSession {
    /// Creates a session for a freshly accepted socket. `auth` is the
    /// context admitted on the handshake request.
    #[must_use]
    pub fn new(connection_id: ConnectionId, auth: AuthContext, outbox: Outbox) -> Self {
        Self {
            chat: ChatSession::new(connection_id, auth),
            connected: false,
            subscriptions: SubscriptionTable::new(),
            outbox,
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.chat.connection_id
    }

    /// Returns the authentication bound to the session.
    #[must_use]
    pub fn auth(&self) -> &AuthContext {
        &self.chat.auth
    }

    /// Handles one WebSocket text message.
    pub async fn handle_text(&mut self, state: &AppState, text: &str) -> Reply {
        if is_heartbeat(text) {
            return Reply::none();
        }
        match Frame::parse(text) {
            Ok(frame) => self.handle_frame(state, frame).await,
            Err(err) => {
                tracing::debug!(connection_id = %self.connection_id(), error = %err, "malformed frame");
                Reply::frame(Frame::error("malformed frame", err.to_string()))
            }
        }
    }

    /// Handles one decoded client frame.
    pub async fn handle_frame(&mut self, state: &AppState, frame: Frame) -> Reply {
        let mut reply = match frame.command {
            Command::Connect | Command::Stomp => return self.on_connect(state, &frame).await,
            _ if !self.connected => Reply::frame(Frame::error(
                "not connected",
                "send CONNECT before any other frame",
            )),
            Command::Subscribe => self.on_subscribe(state, &frame).await,
            Command::Unsubscribe => self.on_unsubscribe(state, &frame).await,
            Command::Send => self.on_send(state, &frame).await,
            Command::Disconnect => Reply {
                frames: Vec::new(),
                close: true,
            },
            Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort => {
                Reply::frame(Frame::error(
                    "unsupported command",
                    format!("{} is not supported", frame.command),
                ))
            }
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                Reply::frame(Frame::error(
                    "unexpected frame",
                    format!("{} is a server frame", frame.command),
                ))
            }
        };

        if let Some(receipt) = frame.get("receipt") {
            match reply.frames.iter_mut().find(|f| f.command == Command::Error) {
                Some(error) => error.headers.push(("receipt-id".to_string(), receipt.to_string())),
                None => reply
                    .frames
                    .push(Frame::new(Command::Receipt).header("receipt-id", receipt)),
            }
        }
        reply
    }

    async fn on_connect(&mut self, state: &AppState, frame: &Frame) -> Reply {
        if self.connected {
            return Reply::frame(Frame::error("already connected", "CONNECT sent twice"));
        }
        let authorization = frame.get("Authorization").or_else(|| frame.get("authorization"));
        if authorization.is_some() {
            self.chat.auth = state.gate.admit(authorization).await;
        }
        self.connected = true;
        tracing::info!(
            connection_id = %self.connection_id(),
            authenticated = self.chat.auth.is_authenticated(),
            "stomp session opened"
        );
        Reply::frame(
            Frame::new(Command::Connected)
                .header("version", STOMP_VERSION)
                .header("heart-beat", "0,0")
                .header("server", concat!("qkd-relay/", env!("CARGO_PKG_VERSION"))),
        )
    }

    async fn on_subscribe(&mut self, state: &AppState, frame: &Frame) -> Reply {
        let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) else {
            return Reply::frame(Frame::error(
                "missing header",
                "SUBSCRIBE requires id and destination",
            ));
        };
        let Some(topic) = Topic::from_destination(destination) else {
            return Reply::frame(Frame::error(
                "invalid destination",
                format!("cannot subscribe to {destination}"),
            ));
        };

        let registry = state.chat.registry();
        if let Some(previous) = self.subscriptions.subscribe(id, topic.clone())
            && previous != topic
            && !self.subscriptions.targets(&previous)
        {
            registry.unsubscribe(self.connection_id(), &previous).await;
        }
        registry
            .subscribe(self.connection_id(), &topic, self.outbox.clone())
            .await;
        Reply::none()
    }

    async fn on_unsubscribe(&mut self, state: &AppState, frame: &Frame) -> Reply {
        let Some(id) = frame.get("id") else {
            return Reply::frame(Frame::error("missing header", "UNSUBSCRIBE requires id"));
        };
        if let Some(topic) = self.subscriptions.unsubscribe(id)
            && !self.subscriptions.targets(&topic)
        {
            state
                .chat
                .registry()
                .unsubscribe(self.connection_id(), &topic)
                .await;
        }
        Reply::none()
    }

    async fn on_send(&mut self, state: &AppState, frame: &Frame) -> Reply {
        let Some(destination) = frame.get("destination") else {
            return Reply::frame(Frame::error("missing header", "SEND requires destination"));
        };
        match state.chat.dispatch(&mut self.chat, destination, &frame.body).await {
            Ok(delivered) => {
                tracing::debug!(connection_id = %self.connection_id(), destination, delivered, "message dispatched");
                Reply::none()
            }
            Err(err) => {
                tracing::debug!(connection_id = %self.connection_id(), error = %err, "message rejected");
                let summary = match &err {
                    ChatError::UnknownDestination(_) => "unknown destination",
                    ChatError::MalformedMessage(_) => "malformed message",
                };
                Reply::frame(Frame::error(summary, err.to_string()))
            }
        }
    }

    /// Renders a delivery as one `MESSAGE` frame per subscription id on its
    /// topic. Empty if the connection no longer subscribes to the topic.
    #[must_use]
    pub fn message_frames(&self, delivery: &Delivery) -> Vec<Frame> {
        if !self.subscriptions.targets(&delivery.topic) {
            return Vec::new();
        }
        let body = match serde_json::to_string(&*delivery.message) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode chat message");
                return Vec::new();
            }
        };
        let destination = delivery.topic.destination();
        self.subscriptions
            .ids_for(&delivery.topic)
            .map(|subscription| {
                Frame::new(Command::Message)
                    .header("subscription", subscription)
                    .header("message-id", uuid::Uuid::new_v4().to_string())
                    .header("destination", destination.as_str())
                    .header("content-type", "application/json")
                    .body(body.as_str())
            })
            .collect()
    }

    /// Removes the connection from every topic and announces its departure.
    pub async fn close(&mut self, state: &AppState) {
        let id = self.connection_id();
        state.chat.registry().disconnect(id).await;
        state.chat.leave(&mut self.chat).await;
    }
}

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads STOMP frames from the client and dispatches them.
/// - Forwards deliveries from the connection's outbound queue as `MESSAGE`
///   frames.
pub async fn run_connection(socket: WebSocket, state: AppState, auth: AuthContext) {
    let connection_id = ConnectionId::new();
    let (outbox, mut inbox) = mpsc::channel::<Delivery>(state.outbound_buffer);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut session = StompSession::new(connection_id, auth, outbox);
    tracing::debug!(%connection_id, "ws connection opened");

    'conn: loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = session.handle_text(&state, text.as_str()).await;
                        for frame in reply.frames {
                            if ws_tx.send(Message::text(frame.encode())).await.is_err() {
                                break 'conn;
                            }
                        }
                        if reply.close {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%connection_id, error = %err, "ws read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Delivery from the topic registry
            delivery = inbox.recv() => {
                let Some(delivery) = delivery else {
                    break;
                };
                for frame in session.message_frames(&delivery) {
                    if ws_tx.send(Message::text(frame.encode())).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }

    session.close(&state).await;
    if let Err(err) = ws_tx.close().await {
        tracing::debug!(%connection_id, error = %err, "ws close failed");
    }
    tracing::debug!(%connection_id, "ws connection closed");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use crate::auth::verifier::tests::{SECRET, sign};
    use crate::domain::{ChatMessage, MessageType};

    async fn connected(state: &AppState) -> (StompSession, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(16);
        let mut session = StompSession::new(ConnectionId::new(), AuthContext::Anonymous, tx);
        let reply = session.handle_text(state, "CONNECT\naccept-version:1.2\n\n\0").await;
        assert_eq!(reply.frames.first().map(|f| f.command), Some(Command::Connected));
        (session, rx)
    }

    async fn subscribe(state: &AppState, session: &mut StompSession, id: &str) {
        let text = format!("SUBSCRIBE\nid:{id}\ndestination:/topic/public\n\n\0");
        let reply = session.handle_text(state, &text).await;
        assert!(reply.frames.is_empty());
    }

    fn first_error(reply: &Reply) -> Option<&str> {
        reply
            .frames
            .iter()
            .find(|f| f.command == Command::Error)
            .and_then(|f| f.get("message"))
    }

    #[tokio::test]
    async fn frames_before_connect_are_refused() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(4);
        let mut session = StompSession::new(ConnectionId::new(), AuthContext::Anonymous, tx);
        let reply = session
            .handle_text(&state, "SUBSCRIBE\nid:0\ndestination:/topic/public\n\n\0")
            .await;
        assert_eq!(first_error(&reply), Some("not connected"));
        assert!(!reply.close);
    }

    #[tokio::test]
    async fn connect_header_binds_identity() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(4);
        let mut session = StompSession::new(ConnectionId::new(), AuthContext::Anonymous, tx);
        let token = sign(SECRET, "uid-5", None, 3600);
        let text = format!("CONNECT\nAuthorization:Bearer {token}\n\n\0");
        session.handle_text(&state, &text).await;
        assert_eq!(session.auth().identity().map(|i| i.subject()), Some("uid-5"));
    }

    #[tokio::test]
    async fn invalid_connect_token_leaves_session_anonymous() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(4);
        let mut session = StompSession::new(ConnectionId::new(), AuthContext::Anonymous, tx);
        let reply = session
            .handle_text(&state, "CONNECT\nAuthorization:Bearer forged\n\n\0")
            .await;
        assert_eq!(reply.frames.first().map(|f| f.command), Some(Command::Connected));
        assert!(!session.auth().is_authenticated());
    }

    #[tokio::test]
    async fn subscribe_then_send_delivers_message_frame() {
        let state = test_state();
        let (mut session, mut rx) = connected(&state).await;
        subscribe(&state, &mut session, "sub-0").await;

        let send = "SEND\ndestination:/app/chat.sendMessage\n\n{\"type\":\"CHAT\",\"content\":\"hi\",\"sender\":\"Alice\"}\0";
        let reply = session.handle_text(&state, send).await;
        assert!(reply.frames.is_empty());

        let Some(delivery) = rx.recv().await else {
            panic!("expected delivery");
        };
        let frames = session.message_frames(&delivery);
        let [frame] = frames.as_slice() else {
            panic!("expected one MESSAGE frame, got {frames:?}");
        };
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/topic/public"));
        let Ok(message) = serde_json::from_str::<ChatMessage>(&frame.body) else {
            panic!("body is not a chat message");
        };
        assert_eq!(message, ChatMessage::chat("Alice", "hi"));
    }

    #[tokio::test]
    async fn each_subscription_id_gets_its_own_frame() {
        let state = test_state();
        let (mut session, mut rx) = connected(&state).await;
        subscribe(&state, &mut session, "sub-0").await;
        subscribe(&state, &mut session, "sub-1").await;

        let topic = state.chat.topic().clone();
        assert_eq!(state.chat.registry().subscriber_count(&topic).await, 1);
        state
            .chat
            .registry()
            .publish(&topic, ChatMessage::chat("Alice", "twice"))
            .await;

        let Some(delivery) = rx.recv().await else {
            panic!("expected delivery");
        };
        let frames = session.message_frames(&delivery);
        let ids: Vec<Option<&str>> = frames.iter().map(|f| f.get("subscription")).collect();
        assert_eq!(ids, vec![Some("sub-0"), Some("sub-1")]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_payload_keeps_connection_open() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session
            .handle_text(&state, "SEND\ndestination:/app/chat.sendMessage\n\n{oops\0")
            .await;
        assert_eq!(first_error(&reply), Some("malformed message"));
        assert!(!reply.close);
    }

    #[tokio::test]
    async fn malformed_frame_is_reported() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session.handle_text(&state, "SEND\nno-colon\n\n\0").await;
        assert_eq!(first_error(&reply), Some("malformed frame"));
    }

    #[tokio::test]
    async fn subscribe_outside_topic_prefix_is_refused() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session
            .handle_text(&state, "SUBSCRIBE\nid:0\ndestination:/app/chat.sendMessage\n\n\0")
            .await;
        assert_eq!(first_error(&reply), Some("invalid destination"));
    }

    #[tokio::test]
    async fn receipt_is_acknowledged() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session
            .handle_text(&state, "SUBSCRIBE\nid:0\ndestination:/topic/public\nreceipt:r-1\n\n\0")
            .await;
        let Some(receipt) = reply.frames.first() else {
            panic!("expected RECEIPT");
        };
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.get("receipt-id"), Some("r-1"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_deliveries() {
        let state = test_state();
        let (mut session, mut rx) = connected(&state).await;
        subscribe(&state, &mut session, "sub-0").await;
        session.handle_text(&state, "UNSUBSCRIBE\nid:sub-0\n\n\0").await;

        let topic = state.chat.topic().clone();
        assert_eq!(state.chat.registry().subscriber_count(&topic).await, 0);
        state
            .chat
            .registry()
            .publish(&topic, ChatMessage::chat("x", "late"))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_removes_subscriptions_and_announces_leave() {
        let state = test_state();
        let (mut leaver, _leaver_rx) = connected(&state).await;
        let (mut watcher, mut watcher_rx) = connected(&state).await;
        subscribe(&state, &mut leaver, "a").await;
        subscribe(&state, &mut watcher, "b").await;

        let join = "SEND\ndestination:/app/chat.addUser\n\n{\"type\":\"JOIN\",\"content\":\"\",\"sender\":\"Eve\"}\0";
        leaver.handle_text(&state, join).await;
        let _ = watcher_rx.recv().await;

        leaver.close(&state).await;
        let topic = state.chat.topic().clone();
        assert_eq!(state.chat.registry().subscriber_count(&topic).await, 1);

        let Some(delivery) = watcher_rx.recv().await else {
            panic!("expected LEAVE");
        };
        assert_eq!(delivery.message.msg_type, MessageType::Leave);
        assert_eq!(delivery.message.sender, "Eve");
    }

    #[tokio::test]
    async fn disconnect_requests_close_with_receipt() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session.handle_text(&state, "DISCONNECT\nreceipt:77\n\n\0").await;
        assert!(reply.close);
        assert_eq!(reply.frames.first().and_then(|f| f.get("receipt-id")), Some("77"));
    }

    #[tokio::test]
    async fn heartbeats_are_ignored() {
        let state = test_state();
        let (mut session, _rx) = connected(&state).await;
        let reply = session.handle_text(&state, "\n").await;
        assert!(reply.frames.is_empty());
        assert!(!reply.close);
    }
}
