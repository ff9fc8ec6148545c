//! Route guards over an auth snapshot.
//!
//! Guards only read state. They never trigger resolution.

use std::fmt;

use crate::context::AuthSnapshot;
use crate::models::User;

/// Where unauthenticated visitors are sent.
pub const LOGIN_PATH: &str = "/auth";

/// Where signed-in visitors without access are sent.
pub const HOME_PATH: &str = "/";

/// Why a guard refused access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// State is not resolved yet; render a placeholder and try again.
    Loading,
    /// No one is signed in.
    RedirectToLogin,
    /// Signed in, but not an admin.
    Forbidden,
}

impl GuardRejection {
    /// Path to send the visitor to, if any.
    #[must_use]
    pub const fn redirect_target(self) -> Option<&'static str> {
        match self {
            Self::Loading => None,
            Self::RedirectToLogin => Some(LOGIN_PATH),
            Self::Forbidden => Some(HOME_PATH),
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Loading => "authentication state is still loading",
            Self::RedirectToLogin => "sign-in required",
            Self::Forbidden => "admin access required",
        };
        f.write_str(reason)
    }
}

/// Require a signed-in user.
///
/// # Errors
///
/// `Loading` before the first resolution, `RedirectToLogin` when anonymous.
pub fn require_user(snapshot: &AuthSnapshot) -> Result<&User, GuardRejection> {
    if snapshot.is_loading() {
        return Err(GuardRejection::Loading);
    }
    snapshot.user().ok_or(GuardRejection::RedirectToLogin)
}

/// Require a signed-in, server-confirmed admin.
///
/// A user whose role is still being resolved is `Loading`, not `Forbidden`.
///
/// # Errors
///
/// As [`require_user`], plus `Forbidden` for non-admins.
pub fn require_admin(snapshot: &AuthSnapshot) -> Result<&User, GuardRejection> {
    let user = require_user(snapshot)?;
    match snapshot.role() {
        None => Err(GuardRejection::Loading),
        Some(_) if snapshot.is_admin() => Ok(user),
        Some(_) => Err(GuardRejection::Forbidden),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ResourceNames;
    use crate::context::{AuthContext, AuthServices};
    use crate::models::SessionEvent;
    use crate::testing::{Authority, FakeBackend, session_for, user};

    async fn ready_context(backend: &Arc<FakeBackend>) -> AuthContext {
        let ctx = AuthContext::new(AuthServices::from_backend(
            backend.clone(),
            &ResourceNames::default(),
        ));
        ctx.mount();
        tokio::time::timeout(Duration::from_secs(2), ctx.wait_until_ready())
            .await
            .unwrap();
        ctx
    }

    #[test]
    fn test_initial_snapshot_is_loading() {
        let snapshot = AuthSnapshot::initial();
        assert_eq!(require_user(&snapshot), Err(GuardRejection::Loading));
        assert_eq!(require_admin(&snapshot), Err(GuardRejection::Loading));
        assert_eq!(GuardRejection::Loading.redirect_target(), None);
    }

    #[tokio::test]
    async fn test_anonymous_is_sent_to_login() {
        let backend = FakeBackend::new();
        let snapshot = ready_context(&backend).await.snapshot();

        let rejection = require_user(&snapshot).unwrap_err();
        assert_eq!(rejection, GuardRejection::RedirectToLogin);
        assert_eq!(rejection.redirect_target(), Some("/auth"));
        assert_eq!(require_admin(&snapshot), Err(GuardRejection::RedirectToLogin));
    }

    #[tokio::test]
    async fn test_admin_guard() {
        let backend = FakeBackend::new();
        let alice = user("alice@clinic.example");
        let mallory = user("mallory@clinic.example");
        backend.set_role(&alice, "admin");
        backend.set_authority(&alice, Authority::Confirm);
        backend.set_role(&mallory, "admin");
        backend.set_authority(&mallory, Authority::Deny);

        let ctx = ready_context(&backend).await;

        backend.emit(SessionEvent::SignedIn, Some(session_for(&alice)));
        let snapshot = ctx
            .wait_until(|s| s.user().is_some_and(|u| u.id == alice.id) && s.role().is_some())
            .await;
        assert_eq!(require_admin(&snapshot).unwrap().id, alice.id);

        backend.emit(SessionEvent::SignedIn, Some(session_for(&mallory)));
        let snapshot = ctx
            .wait_until(|s| s.user().is_some_and(|u| u.id == mallory.id) && s.role().is_some())
            .await;
        assert_eq!(require_user(&snapshot).unwrap().id, mallory.id);
        let rejection = require_admin(&snapshot).unwrap_err();
        assert_eq!(rejection, GuardRejection::Forbidden);
        assert_eq!(rejection.redirect_target(), Some("/"));
    }
}
