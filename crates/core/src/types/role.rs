//! Coarse privilege label attached to a user.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role label stored in the role assignment table.
///
/// `admin` and `user` are the labels the back-office acts on. Any other
/// label is carried through unchanged so that new roles can be introduced on
/// the backend without a release here; such labels never grant admin access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Full access to the content-management screens.
    Admin,
    /// Default role for every signed-in account.
    #[default]
    User,
    /// A label this build does not act on.
    Other(String),
}

impl Role {
    /// Label used for the admin role on the backend.
    pub const ADMIN_LABEL: &'static str = "admin";
    /// Label used for the default role on the backend.
    pub const USER_LABEL: &'static str = "user";

    /// Parse a stored label. Matching is exact: `Admin` is not `admin`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            Self::ADMIN_LABEL => Self::Admin,
            Self::USER_LABEL => Self::User,
            other => Self::Other(other.to_owned()),
        }
    }

    /// The label as stored on the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => Self::ADMIN_LABEL,
            Self::User => Self::USER_LABEL,
            Self::Other(label) => label,
        }
    }

    /// Whether this is the privileged role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(label) => label,
            known => known.as_str().to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_labels() {
        assert_eq!(Role::from_label("admin"), Role::Admin);
        assert_eq!(Role::from_label("user"), Role::User);
        assert_eq!(Role::default(), Role::User);
    }

    #[test]
    fn test_unknown_label_is_kept_and_unprivileged() {
        let role = Role::from_label("moderator");
        assert_eq!(role, Role::Other("moderator".to_string()));
        assert_eq!(role.to_string(), "moderator");
        assert!(!role.is_admin());
    }

    #[test]
    fn test_label_matching_is_exact() {
        assert!(!Role::from_label("Admin").is_admin());
        assert!(!Role::from_label(" admin").is_admin());
    }

    #[test]
    fn test_serde_as_plain_string() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"editor\"").unwrap();
        assert_eq!(role.as_str(), "editor");
    }
}
