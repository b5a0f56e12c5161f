//! Per-connection membership: the display name a connection announced with
//! a join event.
//!
//! A [`SessionMembership`] lives inside its connection's task and is dropped
//! with it; no membership state is shared between connections.

use std::str::FromStr;

use crate::auth::AuthContext;

/// Display identity established by a join event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Name shown as `sender` on this connection's messages.
    pub display_name: String,
}

/// How a join event's claimed name relates to the verified identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipPolicy {
    /// Any connection may claim any name.
    Claimed,
    /// Authenticated connections get their verified name; anonymous ones
    /// may still claim a name.
    #[default]
    Verified,
}

impl FromStr for MembershipPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claimed" => Ok(Self::Claimed),
            "verified" => Ok(Self::Verified),
            other => Err(format!("unknown membership policy: {other}")),
        }
    }
}

impl MembershipPolicy {
    /// Name a connection speaks under: the verified name when the policy
    /// binds it, otherwise the trimmed claim (possibly empty).
    #[must_use]
    pub fn resolve_name(self, claimed: &str, auth: &AuthContext) -> String {
        match (self, auth.identity()) {
            (Self::Verified, Some(identity)) => identity.display_name().to_string(),
            _ => claimed.trim().to_string(),
        }
    }
}

/// Membership slot of a single connection.
#[derive(Debug, Default)]
pub struct SessionMembership {
    current: Option<Membership>,
}

impl SessionMembership {
    /// Creates an empty slot (connection has not joined).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the connection's display name and returns the resulting
    /// membership. A second join replaces the first.
    ///
    /// Returns `None` when the resolved name is blank.
    pub fn join(
        &mut self,
        claimed: &str,
        auth: &AuthContext,
        policy: MembershipPolicy,
    ) -> Option<Membership> {
        let name = policy.resolve_name(claimed, auth);
        if name.is_empty() {
            return None;
        }
        let membership = Membership { display_name: name };
        self.current = Some(membership.clone());
        Some(membership)
    }

    /// Clears the membership, returning what was recorded.
    pub fn leave(&mut self) -> Option<Membership> {
        self.current.take()
    }

    /// Returns the current display name, if the connection has joined.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.current.as_ref().map(|m| m.display_name.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::Identity;

    fn authenticated(subject: &str, name: Option<&str>) -> AuthContext {
        AuthContext::Authenticated(Identity::new(subject, name.map(str::to_string)))
    }

    #[test]
    fn anonymous_join_uses_claimed_name() {
        let mut slot = SessionMembership::new();
        let joined = slot.join("Alice", &AuthContext::Anonymous, MembershipPolicy::Verified);
        assert_eq!(joined.map(|m| m.display_name), Some("Alice".to_string()));
        assert_eq!(slot.display_name(), Some("Alice"));
    }

    #[test]
    fn verified_policy_overrides_claim() {
        let mut slot = SessionMembership::new();
        let auth = authenticated("uid-1", Some("Alice Liddell"));
        let joined = slot.join("Mallory", &auth, MembershipPolicy::Verified);
        assert_eq!(joined.map(|m| m.display_name), Some("Alice Liddell".to_string()));
    }

    #[test]
    fn verified_policy_falls_back_to_subject() {
        let mut slot = SessionMembership::new();
        let joined = slot.join("Mallory", &authenticated("uid-1", None), MembershipPolicy::Verified);
        assert_eq!(joined.map(|m| m.display_name), Some("uid-1".to_string()));
    }

    #[test]
    fn claimed_policy_trusts_client() {
        let mut slot = SessionMembership::new();
        let joined = slot.join("Mallory", &authenticated("uid-1", None), MembershipPolicy::Claimed);
        assert_eq!(joined.map(|m| m.display_name), Some("Mallory".to_string()));
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut slot = SessionMembership::new();
        assert!(slot.join("   ", &AuthContext::Anonymous, MembershipPolicy::Claimed).is_none());
        assert!(slot.display_name().is_none());
    }

    #[test]
    fn leave_clears_membership() {
        let mut slot = SessionMembership::new();
        slot.join("Bob", &AuthContext::Anonymous, MembershipPolicy::Claimed);
        assert_eq!(slot.leave().map(|m| m.display_name), Some("Bob".to_string()));
        assert!(slot.leave().is_none());
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("CLAIMED".parse::<MembershipPolicy>(), Ok(MembershipPolicy::Claimed));
        assert_eq!("verified".parse::<MembershipPolicy>(), Ok(MembershipPolicy::Verified));
        assert!("open".parse::<MembershipPolicy>().is_err());
    }
}
