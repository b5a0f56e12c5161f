//! STOMP wire protocol spoken over the `/ws` socket.

pub mod frame;

pub use frame::{Command, Frame, FrameError, is_heartbeat};

/// Protocol version negotiated with every client.
pub const STOMP_VERSION: &str = "1.2";

/// WebSocket subprotocols offered during the handshake.
pub const SUBPROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];
