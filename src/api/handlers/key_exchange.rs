//! Key-exchange trigger endpoint.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::app_state::AppState;
use crate::auth::RequireIdentity;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /api/qkd/start`: Run a key exchange and stream its log to the chat.
///
/// Blocks until every log line has been relayed, then returns the
/// key-exchange service's JSON body byte for byte.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthorized`] without a verified identity and
/// [`GatewayError::UpstreamUnavailable`] if the key-exchange service fails.
#[utoipa::path(
    get,
    path = "/api/qkd/start",
    tag = "KeyExchange",
    summary = "Start a key exchange",
    description = "Calls the key-exchange service, relays each entry of its `log` array to the chat topic as a QKD_LOG message, and returns the service's response body.",
    responses(
        (status = 200, description = "Key-exchange result from the upstream service", body = serde_json::Value),
        (status = 401, description = "No verified identity", body = ErrorResponse),
        (status = 500, description = "Key-exchange service unavailable", body = ErrorResponse),
    )
)]
pub async fn start_key_exchange(
    RequireIdentity(identity): RequireIdentity,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    tracing::info!(subject = identity.subject(), "key exchange requested");
    let body = state.bridge.run().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Key-exchange routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/qkd/start", get(start_key_exchange))
}
