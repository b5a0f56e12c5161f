//! Connection admission gate.
//!
//! [`AdmissionGate::admit`] runs once per HTTP request (via
//! [`admission_middleware`]) and once per STOMP session (on `CONNECT`). It
//! never rejects anything itself: a missing, non-bearer or unverifiable
//! credential yields [`AuthContext::Anonymous`] and downstream extractors
//! decide whether anonymous access is acceptable.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use super::{AuthContext, Identity, TokenVerifier};
use crate::app_state::AppState;
use crate::error::GatewayError;

/// Authentication scheme accepted in `Authorization` headers.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extracts the credential from a `Bearer <token>` header value.
#[must_use]
pub fn bearer_credential(header: &str) -> Option<&str> {
    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|credential| !credential.is_empty())
}

/// Applies a [`TokenVerifier`] to inbound `Authorization` headers.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl AdmissionGate {
    /// Creates a gate backed by `verifier`.
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Resolves an `Authorization` header value into an [`AuthContext`].
    pub async fn admit(&self, authorization: Option<&str>) -> AuthContext {
        let Some(credential) = authorization.and_then(bearer_credential) else {
            return AuthContext::Anonymous;
        };
        match self.verifier.verify(credential).await {
            Ok(identity) => {
                tracing::debug!(subject = identity.subject(), "bearer credential accepted");
                AuthContext::Authenticated(identity)
            }
            Err(err) => {
                tracing::info!(error = %err, "bearer credential rejected, continuing anonymously");
                AuthContext::Anonymous
            }
        }
    }
}

/// Middleware binding a fresh [`AuthContext`] to every request.
///
/// Any context already present in the request extensions is discarded
/// before the gate runs.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().remove::<AuthContext>();
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let context = state.gate.admit(authorization.as_deref()).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Extractor that requires a bound [`Identity`]; anonymous requests are
/// rejected with `401 Unauthorized`.
#[derive(Debug, Clone)]
pub struct RequireIdentity(pub Identity);

impl<S> FromRequestParts<S> for RequireIdentity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthContext>() {
            Some(AuthContext::Authenticated(identity)) => Ok(Self(identity.clone())),
            _ => Err(GatewayError::Unauthorized),
        }
    }
}
