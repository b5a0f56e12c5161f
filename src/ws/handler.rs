//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::auth::AuthContext;
use crate::stomp::SUBPROTOCOLS;

/// `GET /ws`: Upgrade HTTP connection to a STOMP WebSocket.
///
/// The handshake never requires an identity; whatever the admission gate
/// bound to the upgrade request becomes the session's initial context.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    auth: AuthContext,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.protocols(SUBPROTOCOLS)
        .on_upgrade(move |socket| run_connection(socket, state, auth))
}
