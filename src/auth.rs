//! Authentication context carried through every DB operation and handed to
//! the driver's `access` check.

use serde_json::Value;

/// Bearer of a role (and optionally, additional roles) plus free-form user
/// data, passed to `Driver::access` so drivers can make authorization
/// decisions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthContext {
    /// The authenticated username, if any.
    pub username: Option<String>,
    /// The primary role.
    pub role: Option<String>,
    /// Any additional roles held by this context.
    pub roles: Vec<String>,
    /// Arbitrary user data attached by the caller (unknown fields from the
    /// source dynamic object are preserved here rather than dropped).
    pub user: Option<Value>,
    /// Accumulated failure messages (e.g. from prior failed access checks).
    pub fails: Vec<String>,
}

impl AuthContext {
    /// Builds a context bearing a single role.
    #[must_use]
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Self::default()
        }
    }

    /// Reports whether this context holds `role`, either as the primary
    /// role or among the additional roles.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role) || self.roles.iter().any(|candidate| candidate == role)
    }

    /// `from()` is idempotent in the source specification: constructing a
    /// context from an existing context is a no-op clone.
    #[must_use]
    pub fn from_context(context: &Self) -> Self {
        context.clone()
    }

    /// Records a failure message, e.g. after a denied access check.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.fails.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_role_checks_primary_and_additional_roles() {
        let ctx = AuthContext {
            role: Some("admin".to_owned()),
            roles: vec!["editor".to_owned()],
            ..AuthContext::default()
        };
        assert!(ctx.has_role("admin"));
        assert!(ctx.has_role("editor"));
        assert!(!ctx.has_role("viewer"));
    }

    #[test]
    fn from_context_is_idempotent() {
        let ctx = AuthContext::with_role("admin");
        let copy = AuthContext::from_context(&ctx);
        assert_eq!(ctx, copy);
    }
}
