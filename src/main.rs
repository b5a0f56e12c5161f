//! qkd-relay server entry point.
//!
//! Starts the Axum HTTP server with the STOMP WebSocket endpoint and the
//! REST endpoints.

use tracing_subscriber::EnvFilter;

use qkd_relay::app_state::AppState;
use qkd_relay::build_app;
use qkd_relay::config::RelayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = RelayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(
        addr = %config.listen_addr,
        topic = %config.chat_topic,
        auth = ?config.auth,
        "starting qkd-relay"
    );

    // Build application state and router
    let state = AppState::from_config(&config)?;
    let app = build_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
