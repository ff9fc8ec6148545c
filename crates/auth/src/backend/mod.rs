//! Interfaces to the hosted backend.
//!
//! The backend is reachable only through three narrow surfaces:
//!
//! - [`SessionApi`] - the auth service: current session, change feed, sign-out
//! - [`QueryApi`] - table-scoped queries with equality filters
//! - [`RpcApi`] - named remote procedures (authority check, audit log)
//!
//! [`RestBackend`] implements all three over HTTP. Tests substitute
//! in-memory implementations.

pub mod rest;

pub use rest::RestBackend;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Session, SessionChange};

/// Errors reported by a backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// No row or resource matched.
    #[error("not found")]
    NotFound,

    /// Credentials were missing, expired, or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// A zero-or-one query matched several rows.
    #[error("expected at most one row, got {0}")]
    Cardinality(usize),

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether this error means "nothing there" rather than "something broke".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Equality filter on a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    column: String,
    value: String,
}

impl Filter {
    /// Match rows where `column` equals `value`.
    pub fn eq(column: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Receiving end of a session-change subscription.
///
/// The subscription ends when this receiver is dropped.
pub type SessionFeed = mpsc::UnboundedReceiver<SessionChange>;

/// Auth service of the hosted backend.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// One-shot probe of the current session.
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Register for session-change notifications.
    ///
    /// Every login, logout, and token refresh is delivered in order for as
    /// long as the returned feed is held.
    fn subscribe(&self) -> SessionFeed;

    /// End the current session on the backend.
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Table-scoped data queries.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Fetch zero or one row of `table` matching every filter.
    ///
    /// More than one match is [`BackendError::Cardinality`].
    async fn select_one(&self, table: &str, filters: &[Filter]) -> Result<Option<Value>, BackendError>;
}

/// Named remote procedures.
#[async_trait]
pub trait RpcApi: Send + Sync {
    /// Invoke `procedure` with named JSON arguments.
    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError>;
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_filter_formats_value() {
        let id = Uuid::nil();
        let filter = Filter::eq("user_id", id);
        assert_eq!(filter.column(), "user_id");
        assert_eq!(filter.value(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_backend_error_not_found() {
        assert!(BackendError::NotFound.is_not_found());
        assert!(!BackendError::Cardinality(2).is_not_found());
        assert_eq!(
            BackendError::Cardinality(3).to_string(),
            "expected at most one row, got 3"
        );
    }
}
