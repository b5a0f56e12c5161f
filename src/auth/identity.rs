//! Verified identities and the per-request authentication context.

/// Principal asserted by a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    name: Option<String>,
}

impl Identity {
    /// Creates an identity for `subject` with an optional provider-asserted
    /// display name.
    #[must_use]
    pub fn new(subject: impl Into<String>, name: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// Returns the provider's subject identifier.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the provider-asserted name, falling back to the subject.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.subject)
    }
}

/// Authentication state bound to one request or connection.
///
/// Passed explicitly down the call path (request extension, connection
/// session); never stored in ambient or global state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthContext {
    /// No credential, or the credential failed verification.
    #[default]
    Anonymous,
    /// Credential verified.
    Authenticated(Identity),
}

impl AuthContext {
    /// Returns the bound identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Anonymous => None,
        }
    }

    /// Returns `true` if an identity is bound.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}
