//! Profile lookup for a signed-in user.

use std::sync::Arc;

use tracing::{debug, warn};

use clinic_core::UserId;

use crate::backend::{Filter, QueryApi};
use crate::error::AuthError;
use crate::models::Profile;

/// Fetches profile rows. Never creates them.
#[derive(Clone)]
pub struct ProfileResolver {
    query: Arc<dyn QueryApi>,
    table: String,
}

impl ProfileResolver {
    #[must_use]
    pub fn new(query: Arc<dyn QueryApi>, table: impl Into<String>) -> Self {
        Self {
            query,
            table: table.into(),
        }
    }

    /// Fetch the profile for `user_id`.
    ///
    /// A missing row is `None`. So is any failure: a profile problem must
    /// never hold up establishing the session, so errors are logged and
    /// dropped here.
    pub async fn fetch_profile(&self, user_id: UserId) -> Option<Profile> {
        match self.try_fetch(user_id).await {
            Ok(profile) => Some(profile),
            Err(AuthError::NotFound) => {
                debug!(%user_id, "No profile provisioned");
                None
            }
            Err(e) => {
                warn!(%user_id, error = %e, "Profile fetch failed, continuing without profile");
                None
            }
        }
    }

    async fn try_fetch(&self, user_id: UserId) -> Result<Profile, AuthError> {
        let row = self
            .query
            .select_one(&self.table, &[Filter::eq("id", user_id)])
            .await
            .map_err(AuthError::from_query)?
            .ok_or(AuthError::NotFound)?;

        serde_json::from_value(row).map_err(|e| AuthError::InvalidRecord(e.to_string()))
    }
}
