//! # qkd-relay
//!
//! Real-time chat relay: STOMP over WebSocket with bearer-token admission,
//! topic fan-out, and a bridge that streams an external key-exchange
//! service's log into the chat.
//!
//! ## Architecture
//!
//! ```text
//! Clients (STOMP over /ws, HTTP)
//!     │
//!     ├── Admission gate (auth/)
//!     ├── WS sessions (ws/, stomp/)   REST handlers (api/)
//!     │
//!     ├── ChatService, KeyExchangeBridge (service/)
//!     │
//!     └── TopicRegistry (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod stomp;
pub mod ws;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::auth::admission_middleware;
use crate::ws::handler::ws_handler;

/// Builds the full application router: REST endpoints, the `/ws`
/// handshake, and the admission middleware in front of both.
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };

    router.with_state(state)
}
