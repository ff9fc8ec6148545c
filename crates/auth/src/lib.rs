//! Clinic Auth - session and role authorization for the back-office.
//!
//! Establishes who the current actor is and what they may do:
//!
//! - [`SessionStore`] - authoritative session and its change feed
//! - [`ProfileResolver`] - profile row for the signed-in user
//! - [`RoleResolver`] - effective role, with server-side admin confirmation
//! - [`AuditLogger`] - best-effort login/logout trail
//! - [`AuthContext`] - composes the above into race-safe, observable state
//!
//! # Security
//!
//! A stored `admin` label is never trusted on its own. Admin is granted only
//! after the backend's authority check confirms it in the same resolution
//! pass, and every failure degrades to the plain `user` role.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = BackendConfig::from_env()?;
//! let backend = Arc::new(RestBackend::new(&config)?);
//! let auth = AuthContext::new(AuthServices::from_backend(backend, &config.names));
//! auth.mount();
//! let state = auth.wait_until_ready().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod audit;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod models;
pub mod profile;
pub mod role;
pub mod session;

#[cfg(test)]
mod testing;

pub use audit::{AuditDetails, AuditKind, AuditLogger};
pub use backend::{BackendError, Filter, QueryApi, RestBackend, RpcApi, SessionApi};
pub use config::{BackendConfig, ConfigError, ResourceNames};
pub use context::{AuthContext, AuthPhase, AuthServices, AuthSnapshot, Readiness};
pub use error::AuthError;
pub use guard::{GuardRejection, require_admin, require_user};
pub use models::{Profile, Session, SessionChange, SessionEvent, User};
pub use profile::ProfileResolver;
pub use role::{RoleResolver, RoleSettings};
pub use session::{SessionStore, Subscription};
