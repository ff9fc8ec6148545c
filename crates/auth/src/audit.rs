//! Best-effort audit trail for authentication events.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use clinic_core::{Email, UserId};

use crate::backend::RpcApi;

/// Resource type recorded for every authentication event.
pub const AUTH_RESOURCE_TYPE: &str = "auth";

/// Longest wait for the backend to acknowledge an audit entry.
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Auditable authentication events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    UserLogin,
    UserLogout,
}

impl AuditKind {
    /// Action name stored in the audit log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserLogin => "user_login",
            Self::UserLogout => "user_logout",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditDetails {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
    pub timestamp: DateTime<Utc>,
}

impl AuditDetails {
    /// Details for `user_id` stamped with the current time.
    #[must_use]
    pub fn now(user_id: UserId, email: Option<Email>) -> Self {
        Self {
            user_id,
            email,
            timestamp: Utc::now(),
        }
    }
}

/// Writes audit entries through a remote procedure.
///
/// Failures are logged and dropped. Auditing never blocks or fails the flow
/// it annotates.
#[derive(Clone)]
pub struct AuditLogger {
    rpc: Arc<dyn RpcApi>,
    procedure: String,
    timeout: Duration,
}

impl AuditLogger {
    #[must_use]
    pub fn new(rpc: Arc<dyn RpcApi>, procedure: impl Into<String>) -> Self {
        Self {
            rpc,
            procedure: procedure.into(),
            timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    /// Bound the wait in [`record_event`](Self::record_event).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record an entry and wait for the backend to answer, at most for the
    /// configured timeout.
    pub async fn record_event(&self, kind: AuditKind, details: AuditDetails) {
        let args = json!({
            "_action": kind.as_str(),
            "_resource_type": AUTH_RESOURCE_TYPE,
            "_details": details,
        });

        match tokio::time::timeout(self.timeout, self.rpc.call(&self.procedure, args)).await {
            Ok(Ok(_)) => debug!(action = %kind, user_id = %details.user_id, "Audit entry recorded"),
            Ok(Err(e)) => warn!(
                action = %kind,
                user_id = %details.user_id,
                error = %e,
                "Failed to record audit entry"
            ),
            Err(_) => warn!(
                action = %kind,
                user_id = %details.user_id,
                timeout_ms = self.timeout.as_millis(),
                "Audit entry not acknowledged in time, giving up"
            ),
        }
    }

    /// Record an entry in the background.
    pub fn spawn_record(&self, kind: AuditKind, details: AuditDetails) {
        let logger = self.clone();
        tokio::spawn(async move {
            logger.record_event(kind, details).await;
        });
    }
}
