//! Authentication: bearer token verification and connection admission.
//!
//! Verification is delegated to an external identity provider through
//! [`TokenVerifier`]; the [`AdmissionGate`] turns the outcome into an
//! explicit [`AuthContext`] that is threaded through request handling.

pub mod gate;
pub mod identity;
pub mod verifier;

pub use gate::{AdmissionGate, RequireIdentity, admission_middleware, bearer_credential};
pub use identity::{AuthContext, Identity};
pub use verifier::{
    DenyAllVerifier, JwksVerifier, SharedSecretVerifier, TokenVerifier, VerificationError,
};
