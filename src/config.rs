//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::MembershipPolicy;

/// Default JWKS endpoint for Firebase-issued ID tokens.
pub const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Default key-exchange service endpoint.
pub const DEFAULT_KEY_SERVICE_URL: &str = "http://localhost:5001/generate-key?eavesdrop=true";

/// Where bearer credentials are verified.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// RS256 ID tokens checked against a provider's JWKS.
    Jwks {
        /// Project id expected as audience and issuer suffix.
        project_id: String,
        /// JWKS endpoint.
        jwks_url: String,
        /// How long fetched keys stay valid.
        cache_ttl: Duration,
        /// Shortest gap between refreshes forced by unknown key ids.
        min_refresh: Duration,
    },
    /// HS256 tokens signed with a shared secret.
    SharedSecret(String),
    /// No provider; every connection is anonymous.
    Disabled,
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jwks {
                project_id,
                jwks_url,
                cache_ttl,
                min_refresh,
            } => f
                .debug_struct("Jwks")
                .field("project_id", project_id)
                .field("jwks_url", jwks_url)
                .field("cache_ttl", cache_ttl)
                .field("min_refresh", min_refresh)
                .finish(),
            Self::SharedSecret(_) => write!(f, "SharedSecret([REDACTED])"),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Key-exchange service endpoint called by `/api/qkd/start`.
    pub key_service_url: String,

    /// Delay between relayed log lines.
    pub bridge_pacing: Duration,

    /// Timeout for upstream HTTP calls.
    pub upstream_timeout: Duration,

    /// Name of the shared chat topic.
    pub chat_topic: String,

    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,

    /// Token verification mode.
    pub auth: AuthMode,

    /// Join-name policy.
    pub membership_policy: MembershipPolicy,

    /// Emit logs as JSON lines instead of text.
    pub log_json: bool,
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` cannot be parsed as a
    /// [`SocketAddr`] or `MEMBERSHIP_POLICY` names an unknown policy.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let key_service_url = std::env::var("KEY_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_KEY_SERVICE_URL.to_string());

        let bridge_pacing = Duration::from_millis(parse_env("BRIDGE_PACING_MS", 500));
        let upstream_timeout = Duration::from_secs(parse_env("UPSTREAM_TIMEOUT_SECS", 30));
        let chat_topic = std::env::var("CHAT_TOPIC").unwrap_or_else(|_| "public".to_string());
        let outbound_buffer = parse_env("OUTBOUND_BUFFER", 256).max(1);

        let membership_policy = match std::env::var("MEMBERSHIP_POLICY") {
            Ok(raw) => raw.parse::<MembershipPolicy>()?,
            Err(_) => MembershipPolicy::default(),
        };

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            listen_addr,
            key_service_url,
            bridge_pacing,
            upstream_timeout,
            chat_topic,
            outbound_buffer,
            auth: auth_mode_from_env(),
            membership_policy,
            log_json,
        })
    }
}

/// `FIREBASE_PROJECT_ID` selects JWKS verification; otherwise
/// `AUTH_JWT_SECRET` selects shared-secret verification.
fn auth_mode_from_env() -> AuthMode {
    if let Some(project_id) = non_empty_env("FIREBASE_PROJECT_ID") {
        return AuthMode::Jwks {
            project_id,
            jwks_url: non_empty_env("JWKS_URL").unwrap_or_else(|| DEFAULT_JWKS_URL.to_string()),
            cache_ttl: Duration::from_secs(parse_env("JWKS_CACHE_SECS", 3600)),
            min_refresh: Duration::from_secs(parse_env("JWKS_MIN_REFRESH_SECS", 60)),
        };
    }
    match non_empty_env("AUTH_JWT_SECRET") {
        Some(secret) => AuthMode::SharedSecret(secret),
        None => AuthMode::Disabled,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
