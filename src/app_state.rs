//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::{
    AdmissionGate, DenyAllVerifier, JwksVerifier, SharedSecretVerifier, TokenVerifier,
};
use crate::config::{AuthMode, RelayConfig};
use crate::domain::{Topic, TopicRegistry};
use crate::service::{ChatService, KeyExchangeBridge};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Admission gate applied to requests and STOMP sessions.
    pub gate: AdmissionGate,
    /// Chat routing and membership announcements.
    pub chat: Arc<ChatService>,
    /// Key-exchange log relay.
    pub bridge: Arc<KeyExchangeBridge>,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl AppState {
    /// Builds the state from configuration, selecting the verifier from
    /// [`RelayConfig::auth`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &RelayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        let verifier = verifier_for(&config.auth, client.clone());
        Ok(Self::with_verifier(config, client, verifier))
    }

    /// Builds the state around an explicit verifier.
    #[must_use]
    pub fn with_verifier(
        config: &RelayConfig,
        client: reqwest::Client,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let registry = Arc::new(TopicRegistry::new());
        let topic = Topic::new(config.chat_topic.clone());
        let chat = ChatService::new(
            Arc::clone(&registry),
            topic.clone(),
            config.membership_policy,
        );
        let bridge = KeyExchangeBridge::new(
            client,
            config.key_service_url.clone(),
            config.bridge_pacing,
            registry,
            topic,
        );
        Self {
            gate: AdmissionGate::new(verifier),
            chat: Arc::new(chat),
            bridge: Arc::new(bridge),
            outbound_buffer: config.outbound_buffer,
        }
    }
}

/// Chooses the token verifier for `mode`.
#[must_use]
pub fn verifier_for(mode: &AuthMode, client: reqwest::Client) -> Arc<dyn TokenVerifier> {
    match mode {
        AuthMode::Jwks {
            project_id,
            jwks_url,
            cache_ttl,
            min_refresh,
        } => Arc::new(
            JwksVerifier::new(client, jwks_url.clone(), project_id, *cache_ttl)
                .with_min_refresh_interval(*min_refresh),
        ),
        AuthMode::SharedSecret(secret) => Arc::new(SharedSecretVerifier::new(secret.as_bytes())),
        AuthMode::Disabled => {
            tracing::warn!("no identity provider configured, all connections are anonymous");
            Arc::new(DenyAllVerifier)
        }
    }
}

/// State with a shared-secret verifier and zero bridge pacing.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use std::time::Duration;

    let config = RelayConfig {
        listen_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
        key_service_url: "http://127.0.0.1:1/generate-key".to_string(),
        bridge_pacing: Duration::ZERO,
        upstream_timeout: Duration::from_secs(5),
        chat_topic: "public".to_string(),
        outbound_buffer: 16,
        auth: AuthMode::SharedSecret(
            String::from_utf8_lossy(crate::auth::verifier::tests::SECRET).into_owned(),
        ),
        membership_policy: crate::domain::MembershipPolicy::Verified,
        log_json: false,
    };
    let verifier = verifier_for(&config.auth, reqwest::Client::new());
    AppState::with_verifier(&config, reqwest::Client::new(), verifier)
}
