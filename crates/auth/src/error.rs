//! Error taxonomy for the authorization subsystem.
//!
//! Only [`AuthError::SignOutFailed`] ever reaches consumers of the auth
//! context. The other variants are produced inside the resolvers and folded
//! into safe defaults (`None` profile, `user` role) before anything is
//! published.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors produced while establishing or tearing down the current actor.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The backend could not be reached or answered with an unexpected error.
    ///
    /// Transient. The caller keeps whatever state it already had.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[source] BackendError),

    /// The requested record does not exist.
    ///
    /// Expected for users without a profile or role assignment.
    #[error("record not found")]
    NotFound,

    /// A record was returned but could not be decoded.
    #[error("malformed record: {0}")]
    InvalidRecord(String),

    /// The server-side authority check did not confirm the admin role.
    #[error("admin verification failed: {0}")]
    VerificationFailed(String),

    /// The backend refused or failed the sign-out request.
    #[error("sign-out failed: {0}")]
    SignOutFailed(#[source] BackendError),
}

impl AuthError {
    /// Map a query error, keeping "no rows" distinct from real failures.
    pub(crate) fn from_query(err: BackendError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::BackendUnavailable(err)
        }
    }
}
