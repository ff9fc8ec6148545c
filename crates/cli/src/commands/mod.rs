//! CLI command implementations.

pub mod login;
pub mod watch;

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use clinic_auth::{
    AuthContext, AuthError, AuthPhase, AuthServices, AuthSnapshot, BackendConfig, BackendError,
    ConfigError, Readiness, RestBackend,
};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sign-in failed: {0}")]
    SignIn(#[source] BackendError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Output error: {0}")]
    Output(#[from] serde_yaml::Error),
}

/// Load configuration, mount an auth context, and sign in.
///
/// The context is mounted before signing in so the sign-in arrives as a
/// regular session change.
pub async fn connect(email: &str, password: &SecretString) -> Result<AuthContext, CommandError> {
    let config = BackendConfig::from_env()?;
    info!(url = %config.url, "Connecting to backend");

    let backend = Arc::new(RestBackend::new(&config)?);
    let auth = AuthContext::new(AuthServices::from_backend(backend.clone(), &config.names));
    auth.mount();
    auth.wait_until_ready().await;

    backend
        .sign_in_with_password(email, password)
        .await
        .map_err(CommandError::SignIn)?;

    Ok(auth)
}

/// Printable view of an auth snapshot.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_expires_at: Option<String>,
}

impl From<&AuthSnapshot> for StatusReport {
    fn from(snapshot: &AuthSnapshot) -> Self {
        let state = match snapshot.phase() {
            AuthPhase::Uninitialized => "uninitialized",
            AuthPhase::Resolving => "resolving",
            AuthPhase::Ready(Readiness::Authenticated) => "authenticated",
            AuthPhase::Ready(Readiness::Anonymous) => "anonymous",
        };

        Self {
            state,
            user_id: snapshot.user().map(|u| u.id.to_string()),
            email: snapshot
                .user()
                .and_then(|u| u.email.as_ref())
                .map(ToString::to_string),
            name: snapshot
                .profile()
                .and_then(|p| p.display_name())
                .map(str::to_string),
            role: snapshot.role().map(ToString::to_string),
            is_admin: snapshot.is_admin(),
            session_expires_at: snapshot
                .session()
                .and_then(clinic_auth::Session::expires_at)
                .map(|at| at.to_rfc3339()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_report_for_initial_state() {
        let report = StatusReport::from(&AuthSnapshot::initial());
        assert_eq!(report.state, "uninitialized");
        assert!(report.user_id.is_none());
        assert!(!report.is_admin);

        let yaml = serde_yaml::to_string(&report).unwrap();
        assert_eq!(yaml, "state: uninitialized\nis_admin: false\n");
    }
}
