//! Effective role resolution.
//!
//! The role assignment table is readable, and in principle writable, from
//! the client side, so a stored `admin` label is only a claim. The claim is
//! honoured only after a second, server-side procedure re-derives admin
//! status from the backend's own access control. Non-privileged labels are
//! taken as stored.
//!
//! Every failure resolves to [`Role::User`]. Nothing here retries; the next
//! session change or an explicit refresh is the retry.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use clinic_core::{Role, UserId};

use crate::backend::{Filter, QueryApi, RpcApi};
use crate::config::ResourceNames;
use crate::error::AuthError;

/// Where role assignments live and how to reach the authority check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSettings {
    /// Role assignment table.
    pub table: String,
    /// Column of `table` holding the user ID.
    pub user_column: String,
    /// Authority check procedure, `(user_id, role) -> bool`.
    pub authority_procedure: String,
    /// Name of the user ID argument of the procedure.
    pub user_arg: String,
    /// Name of the role argument of the procedure.
    pub role_arg: String,
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self::from(&ResourceNames::default())
    }
}

impl From<&ResourceNames> for RoleSettings {
    fn from(names: &ResourceNames) -> Self {
        Self {
            table: names.roles_table.clone(),
            user_column: "user_id".to_string(),
            authority_procedure: names.role_check_fn.clone(),
            user_arg: "_user_id".to_string(),
            role_arg: "_role".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RoleRow {
    role: Role,
}

/// Determines a user's effective role.
#[derive(Clone)]
pub struct RoleResolver {
    query: Arc<dyn QueryApi>,
    rpc: Arc<dyn RpcApi>,
    settings: RoleSettings,
}

impl RoleResolver {
    #[must_use]
    pub fn new(query: Arc<dyn QueryApi>, rpc: Arc<dyn RpcApi>, settings: RoleSettings) -> Self {
        Self {
            query,
            rpc,
            settings,
        }
    }

    /// Resolve the effective role of `user_id`.
    pub async fn resolve_role(&self, user_id: UserId) -> Role {
        let stored = match self.stored_role(user_id).await {
            Ok(Some(role)) => role,
            Ok(None) | Err(AuthError::NotFound) => {
                debug!(%user_id, "No role assignment, using default role");
                return Role::User;
            }
            Err(e) => {
                error!(%user_id, error = %e, "Role lookup failed, using default role");
                return Role::User;
            }
        };

        if !stored.is_admin() {
            return stored;
        }

        match self.verify_admin(user_id).await {
            Ok(()) => {
                info!(%user_id, "Admin role confirmed by authority check");
                Role::Admin
            }
            Err(e) => {
                warn!(%user_id, error = %e, "Stored admin role not confirmed, downgrading to user");
                Role::User
            }
        }
    }

    async fn stored_role(&self, user_id: UserId) -> Result<Option<Role>, AuthError> {
        let row = self
            .query
            .select_one(
                &self.settings.table,
                &[Filter::eq(&self.settings.user_column, user_id)],
            )
            .await
            .map_err(AuthError::from_query)?;

        row.map(|row| {
            serde_json::from_value::<RoleRow>(row)
                .map(|r| r.role)
                .map_err(|e| AuthError::InvalidRecord(e.to_string()))
        })
        .transpose()
    }

    /// Ask the server whether `user_id` really is an admin.
    ///
    /// Only a JSON `true` counts as confirmation.
    async fn verify_admin(&self, user_id: UserId) -> Result<(), AuthError> {
        let mut args = Map::new();
        args.insert(self.settings.user_arg.clone(), Value::String(user_id.to_string()));
        args.insert(
            self.settings.role_arg.clone(),
            Value::String(Role::ADMIN_LABEL.to_string()),
        );

        let answer = self
            .rpc
            .call(&self.settings.authority_procedure, Value::Object(args))
            .await
            .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        match answer {
            Value::Bool(true) => Ok(()),
            other => Err(AuthError::VerificationFailed(format!(
                "authority check returned {other}"
            ))),
        }
    }
}
