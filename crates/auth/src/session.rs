//! Session store: the single authoritative view of the backend session.

use std::sync::Arc;

use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::backend::SessionApi;
use crate::error::AuthError;
use crate::models::{Session, SessionEvent};

/// Handle to a live session-change subscription.
///
/// Disposing (or dropping) the handle stops delivery; the callback is never
/// invoked again afterwards.
#[derive(Debug)]
pub struct Subscription {
    task: AbortHandle,
}

impl Subscription {
    /// Stop delivering notifications.
    pub fn dispose(&self) {
        self.task.abort();
    }

    /// Whether notifications are still being delivered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Produces the current session and announces changes to it.
#[derive(Clone)]
pub struct SessionStore {
    api: Arc<dyn SessionApi>,
}

impl SessionStore {
    #[must_use]
    pub fn new(api: Arc<dyn SessionApi>) -> Self {
        Self { api }
    }

    /// One-shot probe of the current session.
    ///
    /// No retries: a failed probe is reported and the caller decides what to
    /// keep.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BackendUnavailable` if the probe fails.
    pub async fn get_current_session(&self) -> Result<Option<Session>, AuthError> {
        self.api.current_session().await.map_err(|e| {
            warn!(error = %e, "Session probe failed");
            AuthError::BackendUnavailable(e)
        })
    }

    /// Invoke `callback` for every session change until the returned
    /// subscription is disposed.
    ///
    /// Notifications are delivered in order from a spawned task, so this must
    /// be called inside a Tokio runtime.
    pub fn on_session_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SessionEvent, Option<Session>) + Send + 'static,
    {
        let mut feed = self.api.subscribe();
        let task = tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                debug!(event = %change.event, signed_in = change.session.is_some(), "Session change");
                callback(change.event, change.session);
            }
            debug!("Session feed closed");
        });

        Subscription {
            task: task.abort_handle(),
        }
    }

    /// End the session on the backend.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SignOutFailed` if the backend refuses.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.api.sign_out().await.map_err(AuthError::SignOutFailed)
    }
}
