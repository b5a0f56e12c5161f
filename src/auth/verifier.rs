//! Bearer token verification.
//!
//! [`TokenVerifier`] turns an opaque credential into an [`Identity`] or a
//! [`VerificationError`]. Verifiers hold no per-call state and are safe to
//! share across connections behind an `Arc`.
//!
//! - [`JwksVerifier`]: RS256 ID tokens checked against an identity
//!   provider's published JSON Web Key Set (Firebase-style issuer and
//!   audience).
//! - [`SharedSecretVerifier`]: HS256 tokens signed with a local secret.
//! - [`DenyAllVerifier`]: no provider configured; every credential fails.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::Identity;

/// Issuer prefix for Firebase-style ID tokens.
pub const SECURETOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Reasons a credential is not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// Not a recognizable token.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// Signature does not verify or the signing key is unknown.
    #[error("invalid token signature: {0}")]
    SignatureInvalid(String),

    /// Issuer, audience, subject or not-before checks failed.
    #[error("token claims rejected: {0}")]
    ClaimsRejected(String),

    /// Signing keys could not be obtained from the identity provider.
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),
}

impl From<jsonwebtoken::errors::Error> for VerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidKeyFormat => {
                Self::SignatureInvalid(err.to_string())
            }
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::ClaimsRejected(err.to_string()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Verifies bearer credentials.
#[async_trait]
pub trait TokenVerifier: Send + Sync + fmt::Debug {
    /// Verifies `credential` and returns the asserted identity.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] describing why the credential was
    /// not accepted.
    async fn verify(&self, credential: &str) -> Result<Identity, VerificationError>;
}

/// Claims read from a verified token.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
}

impl TokenClaims {
    fn into_identity(self) -> Result<Identity, VerificationError> {
        if self.sub.trim().is_empty() {
            return Err(VerificationError::ClaimsRejected("empty subject".to_string()));
        }
        Ok(Identity::new(self.sub, self.name))
    }
}

/// HS256 verifier for tokens signed with a shared secret.
#[derive(Clone)]
pub struct SharedSecretVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SharedSecretVerifier {
    /// Creates a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecretVerifier([REDACTED])")
    }
}

#[async_trait]
impl TokenVerifier for SharedSecretVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, VerificationError> {
        let data = jsonwebtoken::decode::<TokenClaims>(credential, &self.key, &self.validation)?;
        data.claims.into_identity()
    }
}

#[derive(Debug)]
struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

impl CachedKeys {
    fn key(&self, kid: &str) -> Option<Result<DecodingKey, VerificationError>> {
        let jwk = self.keys.find(kid)?;
        Some(DecodingKey::from_jwk(jwk).map_err(VerificationError::from))
    }
}

/// Shortest gap between two JWKS fetches forced by unknown key ids.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// RS256 verifier backed by an identity provider's JWKS endpoint.
///
/// Keys are cached for `cache_ttl`. A token carrying an unknown `kid`
/// forces one refresh before it is rejected, but at most once per
/// `min_refresh_interval`; inside that window unknown ids are rejected from
/// the cache.
#[derive(Debug)]
pub struct JwksVerifier {
    client: reqwest::Client,
    jwks_url: String,
    validation: Validation,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksVerifier {
    /// Creates a verifier for ID tokens issued for `project_id`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        jwks_url: impl Into<String>,
        project_id: &str,
        cache_ttl: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{SECURETOKEN_ISSUER_PREFIX}{project_id}")]);
        validation.set_audience(&[project_id]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);
        Self {
            client,
            jwks_url: jwks_url.into(),
            validation,
            cache_ttl,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            cache: RwLock::new(None),
        }
    }

    /// Sets the shortest gap between refreshes forced by unknown key ids.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    fn is_fresh(&self, cached: &CachedKeys) -> bool {
        cached.fetched_at.elapsed() < self.cache_ttl
    }

    async fn fetch(&self) -> Result<JwkSet, VerificationError> {
        let keys = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| VerificationError::ProviderUnreachable(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| VerificationError::ProviderUnreachable(e.to_string()))?;
        tracing::debug!(keys = keys.keys.len(), url = %self.jwks_url, "refreshed signing keys");
        Ok(keys)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, VerificationError> {
        let unknown = || VerificationError::SignatureInvalid(format!("unknown signing key: {kid}"));

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| self.is_fresh(c))
                && let Some(key) = cached.key(kid)
            {
                return key;
            }
        }

        // Misses serialize here; whoever waited re-checks what the
        // previous holder fetched.
        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref().filter(|c| self.is_fresh(c)) {
            if let Some(key) = cached.key(kid) {
                return key;
            }
            if cached.fetched_at.elapsed() < self.min_refresh_interval {
                tracing::debug!(kid, "unknown key id, refresh suppressed");
                return Err(unknown());
            }
        }

        let keys = self.fetch().await?;
        let fresh = CachedKeys {
            keys,
            fetched_at: Instant::now(),
        };
        let key = fresh.key(kid);
        *cache = Some(fresh);
        key.unwrap_or_else(|| Err(unknown()))
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, VerificationError> {
        let header = jsonwebtoken::decode_header(credential)?;
        let kid = header
            .kid
            .ok_or_else(|| VerificationError::Malformed("missing key id".to_string()))?;
        let key = self.decoding_key(&kid).await?;
        let data = jsonwebtoken::decode::<TokenClaims>(credential, &key, &self.validation)?;
        data.claims.into_identity()
    }
}

/// Verifier used when no identity provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllVerifier;

#[async_trait]
impl TokenVerifier for DenyAllVerifier {
    async fn verify(&self, _credential: &str) -> Result<Identity, VerificationError> {
        Err(VerificationError::ProviderUnreachable(
            "no identity provider configured".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::State;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;
    use serde_json::{Value, json};

    pub(crate) const SECRET: &[u8] = b"relay-test-secret";

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<&'a str>,
    }

    /// Signs an HS256 token expiring `ttl_secs` from now.
    pub(crate) fn sign(secret: &[u8], sub: &str, name: Option<&str>, ttl_secs: i64) -> String {
        let claims = Claims {
            sub,
            exp: chrono::Utc::now().timestamp() + ttl_secs,
            name,
        };
        let Ok(token) =
            jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        else {
            panic!("signing failed");
        };
        token
    }

    #[tokio::test]
    async fn valid_token_yields_subject() {
        let verifier = SharedSecretVerifier::new(SECRET);
        let token = sign(SECRET, "uid-42", Some("Alice"), 3600);
        let Ok(identity) = verifier.verify(&token).await else {
            panic!("valid token rejected");
        };
        assert_eq!(identity.subject(), "uid-42");
        assert_eq!(identity.display_name(), "Alice");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let verifier = SharedSecretVerifier::new(SECRET);
        let token = sign(SECRET, "uid-42", None, -3600);
        assert_eq!(verifier.verify(&token).await, Err(VerificationError::Expired));
    }

    #[tokio::test]
    async fn wrong_secret_fails_signature() {
        let verifier = SharedSecretVerifier::new(SECRET);
        let token = sign(b"someone-else", "uid-42", None, 3600);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::SignatureInvalid(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let verifier = SharedSecretVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify("not-a-token").await,
            Err(VerificationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn empty_subject_is_rejected() {
        let verifier = SharedSecretVerifier::new(SECRET);
        let token = sign(SECRET, " ", None, 3600);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::ClaimsRejected(_))
        ));
    }

    #[tokio::test]
    async fn deny_all_rejects_everything() {
        let token = sign(SECRET, "uid-42", None, 3600);
        assert!(DenyAllVerifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn jwks_without_key_id_is_malformed() {
        let verifier = JwksVerifier::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/jwks",
            "demo-project",
            Duration::from_secs(60),
        );
        let token = sign(SECRET, "uid-42", None, 3600);
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn jwks_unreachable_provider_is_reported() {
        let verifier = JwksVerifier::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/jwks",
            "demo-project",
            Duration::from_secs(60),
        );
        let mut header = Header::default();
        header.kid = Some("k1".to_string());
        let claims = Claims {
            sub: "uid-42",
            exp: chrono::Utc::now().timestamp() + 3600,
            name: None,
        };
        let Ok(token) = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET))
        else {
            panic!("signing failed");
        };
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::ProviderUnreachable(_))
        ));
    }

    const PROJECT: &str = "demo-project";
    const RSA_PEM: &str = include_str!("testdata/rsa_private.pem");
    const RSA_N: &str = "togVSsBAxpcDDWqM4zpBPziGtvIGCmdmzlaR6xhwp5ujaOwae9mvq0ldcrt6RzDwOHZPmn80kKbLSxMu9JTzJ7YSHNBl4-7Xo9I_OgZx99Es0i2ntNpwJfa5DPrZhG2CGJpSr2s9rIdMk09XGfs40xENf8apOTpzmJyN_LN9Z7WSwEZMTwrJ43O1ako8ytORnMONk83RMEZVxX7pm9bN2AKGpWidy5LfCJQoAiQdEjZe_Kzlv_Bdjd_w_pIEKqku650vvP2fQl-dUyvnziSnolsuakhGVlIsrSUOSioG-qCLAPJX04Sj3NGdyUPBu07gNFeEi5-waBN97S8h-AU4bw";

    fn jwk(kid: &str) -> Value {
        json!({"kty": "RSA", "use": "sig", "alg": "RS256", "kid": kid, "n": RSA_N, "e": "AQAB"})
    }

    /// JWKS endpoint that counts its fetches.
    #[derive(Debug, Clone, Default)]
    struct KeyServer {
        keys: Arc<RwLock<Vec<Value>>>,
        fetches: Arc<AtomicUsize>,
    }

    impl KeyServer {
        async fn publish(&self, kid: &str) {
            self.keys.write().await.push(jwk(kid));
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        async fn serve(&self) -> String {
            let router = axum::Router::new()
                .route(
                    "/jwks",
                    axum::routing::get(|State(server): State<KeyServer>| async move {
                        server.fetches.fetch_add(1, Ordering::SeqCst);
                        let keys = server.keys.read().await.clone();
                        axum::Json(json!({ "keys": keys }))
                    }),
                )
                .with_state(self.clone());
            let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
                panic!("bind failed");
            };
            let Ok(addr) = listener.local_addr() else {
                panic!("no local addr");
            };
            tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
            });
            format!("http://{addr}/jwks")
        }
    }

    fn rs256(kid: &str, project: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let claims = json!({
            "sub": "uid-7",
            "name": "Alice",
            "aud": project,
            "iss": format!("{SECURETOKEN_ISSUER_PREFIX}{project}"),
            "iat": now,
            "exp": now + 3600,
        });
        let Ok(key) = EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()) else {
            panic!("fixture key unreadable");
        };
        let Ok(token) = jsonwebtoken::encode(&header, &claims, &key) else {
            panic!("signing failed");
        };
        token
    }

    async fn jwks_verifier(server: &KeyServer, ttl: Duration) -> JwksVerifier {
        JwksVerifier::new(reqwest::Client::new(), server.serve().await, PROJECT, ttl)
    }

    #[tokio::test]
    async fn jwks_accepts_token_signed_by_published_key() {
        let server = KeyServer::default();
        server.publish("k1").await;
        let verifier = jwks_verifier(&server, Duration::from_secs(3600)).await;

        let Ok(identity) = verifier.verify(&rs256("k1", PROJECT)).await else {
            panic!("valid RS256 token rejected");
        };
        assert_eq!(identity.subject(), "uid-7");
        assert_eq!(identity.display_name(), "Alice");

        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());
        assert_eq!(server.fetches(), 1);
    }

    #[tokio::test]
    async fn jwks_rejects_token_for_another_project() {
        let server = KeyServer::default();
        server.publish("k1").await;
        let verifier = jwks_verifier(&server, Duration::from_secs(3600)).await;

        assert!(matches!(
            verifier.verify(&rs256("k1", "other-project")).await,
            Err(VerificationError::ClaimsRejected(_))
        ));
    }

    #[tokio::test]
    async fn unknown_key_ids_are_not_refetched_within_interval() {
        let server = KeyServer::default();
        server.publish("k1").await;
        let verifier = jwks_verifier(&server, Duration::from_secs(3600)).await;
        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());

        for i in 0..20 {
            let token = rs256(&format!("rotated-{i}"), PROJECT);
            assert!(matches!(
                verifier.verify(&token).await,
                Err(VerificationError::SignatureInvalid(_))
            ));
        }
        assert_eq!(server.fetches(), 1);
    }

    #[tokio::test]
    async fn unknown_key_id_forces_one_refresh() {
        let server = KeyServer::default();
        let verifier = jwks_verifier(&server, Duration::from_secs(3600))
            .await
            .with_min_refresh_interval(Duration::ZERO);

        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_err());
        assert_eq!(server.fetches(), 1);

        server.publish("k1").await;
        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());
        assert_eq!(server.fetches(), 2);
    }

    #[tokio::test]
    async fn expired_key_cache_is_refetched() {
        let server = KeyServer::default();
        server.publish("k1").await;
        let verifier = jwks_verifier(&server, Duration::from_millis(50)).await;

        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());
        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());
        assert_eq!(server.fetches(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(verifier.verify(&rs256("k1", PROJECT)).await.is_ok());
        assert_eq!(server.fetches(), 2);
    }
}
