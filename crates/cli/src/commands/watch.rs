//! `clinic-cli watch`: follow auth state changes until interrupted.

use secrecy::SecretString;
use tracing::{info, warn};

use super::{CommandError, StatusReport, connect};
use crate::telemetry::sync_sentry_user;

/// Sign in and log every published state until Ctrl-C, then sign out.
///
/// # Errors
///
/// Returns an error if configuration is missing, sign-in is rejected, or
/// the final sign-out fails.
pub async fn run(email: &str, password: &SecretString) -> Result<(), CommandError> {
    let auth = connect(email, password).await?;
    let mut changes = auth.subscribe();

    loop {
        let report = {
            let snapshot = changes.borrow_and_update();
            sync_sentry_user(&snapshot);
            StatusReport::from(&*snapshot)
        };
        info!(
            state = report.state,
            user_id = report.user_id.as_deref(),
            role = report.role.as_deref(),
            is_admin = report.is_admin,
            "Auth state"
        );

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Auth context closed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if auth.user().is_some() {
        auth.sign_out().await?;
    }
    auth.teardown();
    Ok(())
}
