//! Domain types exchanged with the hosted backend.
//!
//! These mirror the records the backend owns. Nothing here is created by the
//! back-office; sessions come from the auth service, profiles and role
//! assignments from their tables.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use clinic_core::{Email, UserId};

/// Stable identity of an authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account ID assigned by the auth service.
    pub id: UserId,
    /// Primary email, if the account has a usable one.
    #[serde(default, deserialize_with = "lenient_email")]
    pub email: Option<Email>,
}

impl User {
    /// Create a user with the given ID and email.
    #[must_use]
    pub const fn new(id: UserId, email: Option<Email>) -> Self {
        Self { id, email }
    }
}

/// Accounts created by phone or OAuth can carry an empty or odd email; that
/// must not make the whole session undecodable.
fn lenient_email<'de, D>(deserializer: D) -> Result<Option<Email>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| Email::parse(&s).ok()))
}

/// Backend-issued proof of authentication.
///
/// Its presence is the only signal that someone is logged in. Tokens are
/// kept in [`SecretString`] and redacted from `Debug` output.
#[derive(Clone)]
pub struct Session {
    user: User,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Seconds before the recorded expiry at which a session counts as expired.
    pub const EXPIRY_LEEWAY_SECS: i64 = 10;

    /// Create a session for `user` authorized by `access_token`.
    #[must_use]
    pub const fn new(user: User, access_token: SecretString) -> Self {
        Self {
            user,
            access_token,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Attach the refresh token issued alongside the access token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: SecretString) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    /// Attach the access token expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The account this session belongs to.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// Bearer token for authenticated backend requests.
    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Token used to obtain a fresh access token.
    #[must_use]
    pub const fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// When the access token stops being accepted.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the access token is expired (or about to be) at `now`.
    ///
    /// An expiry too early to subtract the leeway from counts as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| {
            at.checked_sub_signed(Duration::seconds(Self::EXPIRY_LEEWAY_SECS))
                .is_none_or(|deadline| now >= deadline)
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Profile row from the `profiles` table, keyed by user ID.
///
/// Created out-of-band at registration. A missing row is a valid state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same ID as the owning [`User`].
    pub id: UserId,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Name to greet the user with: the full name, else the email.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.email.as_deref())
    }
}

/// Kinds of session-change notifications pushed by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    /// Delivered once per subscription with the session at subscribe time.
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        };
        f.write_str(name)
    }
}

/// One notification from the session-change feed.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub event: SessionEvent,
    pub session: Option<Session>,
}

impl SessionChange {
    #[must_use]
    pub const fn new(event: SessionEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}
