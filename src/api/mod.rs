//! REST API layer: route handlers, OpenAPI document, and router
//! composition.
//!
//! `/health` is public; `/api/qkd/start` requires a verified identity.

pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI document for the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(
        handlers::system::health_handler,
        handlers::key_exchange::start_key_exchange,
    ),
    components(schemas(ErrorResponse, ErrorBody)),
    tags(
        (name = "System", description = "Liveness and service metadata"),
        (name = "KeyExchange", description = "Key-exchange log relay"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::key_exchange::routes())
        .merge(handlers::system::routes())
}
