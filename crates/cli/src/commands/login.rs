//! `clinic-cli login`: sign in once and print the resolved state.

use secrecy::SecretString;
use tracing::info;

use super::{CommandError, StatusReport, connect};
use crate::telemetry::sync_sentry_user;

/// Sign in, wait for the profile and role to resolve, and print them as YAML.
///
/// # Errors
///
/// Returns an error if configuration is missing, sign-in is rejected, or
/// the optional sign-out fails.
pub async fn run(email: &str, password: &SecretString, sign_out: bool) -> Result<(), CommandError> {
    let auth = connect(email, password).await?;

    let snapshot = auth
        .wait_until(|s| s.user().is_some() && s.role().is_some())
        .await;
    sync_sentry_user(&snapshot);

    let report = serde_yaml::to_string(&StatusReport::from(&snapshot))?;
    #[allow(clippy::print_stdout)]
    {
        print!("{report}");
    }

    if sign_out {
        auth.sign_out().await?;
        sync_sentry_user(&auth.snapshot());
        info!("Signed out");
    }

    auth.teardown();
    Ok(())
}
