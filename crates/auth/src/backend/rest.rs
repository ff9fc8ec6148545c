//! HTTP client for the hosted backend.
//!
//! # Endpoints
//!
//! - Auth service: `POST auth/v1/token?grant_type=password|refresh_token`,
//!   `POST auth/v1/logout`
//! - Tables: `GET rest/v1/{table}?{column}=eq.{value}`
//! - Procedures: `POST rest/v1/rpc/{procedure}`
//!
//! Every request carries the anonymous key in the `apikey` header and a
//! bearer token: the signed-in user's access token when there is one, the
//! anonymous key otherwise. The current session lives in memory only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{BackendError, Filter, QueryApi, RpcApi, SessionApi, SessionFeed};
use crate::config::BackendConfig;
use crate::models::{Session, SessionChange, SessionEvent, User};

/// Buffered session changes per subscriber before older ones are dropped.
const CHANGE_BUFFER: usize = 32;

/// Token grant response from the auth service.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix timestamp of expiry; preferred over `expires_in` when present.
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    /// Build a session, rejecting expiry values outside the representable range.
    fn into_session(self, now: DateTime<Utc>) -> Result<Session, BackendError> {
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(ts), _) => Some(
                DateTime::from_timestamp(ts, 0)
                    .ok_or_else(|| BackendError::Decode(format!("expires_at out of range: {ts}")))?,
            ),
            (None, Some(secs)) => Some(
                Duration::try_seconds(secs)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        BackendError::Decode(format!("expires_in out of range: {secs}"))
                    })?,
            ),
            (None, None) => None,
        };

        let mut session = Session::new(self.user, SecretString::from(self.access_token));
        if let Some(refresh) = self.refresh_token {
            session = session.with_refresh_token(SecretString::from(refresh));
        }
        if let Some(at) = expires_at {
            session = session.with_expiry(at);
        }
        Ok(session)
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

/// Error body shapes used by the auth service and the table API.
#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

/// Hosted backend client.
///
/// Cheap to clone; clones share the HTTP connection pool, the stored
/// session, and the change feed.
#[derive(Clone)]
pub struct RestBackend {
    inner: Arc<RestBackendInner>,
}

struct RestBackendInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: SecretString,
    session: RwLock<Option<Session>>,
    changes: broadcast::Sender<SessionChange>,
}

impl RestBackend {
    /// Create a new backend client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(config.anon_key_str())
                .map_err(|e| BackendError::Decode(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);

        Ok(Self {
            inner: Arc::new(RestBackendInner {
                client,
                base_url: config.url.clone(),
                anon_key: config.anon_key.clone(),
                session: RwLock::new(None),
                changes,
            }),
        })
    }

    // =========================================================================
    // Auth service
    // =========================================================================

    /// Sign in with email and password.
    ///
    /// Stores the new session and notifies subscribers with `SignedIn`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unauthorized` for rejected credentials.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        let url = self.token_url("password")?;
        let response = self
            .inner
            .client
            .post(url)
            .bearer_auth(self.inner.anon_key.expose_secret())
            .json(&PasswordGrant {
                email,
                password: password.expose_secret(),
            })
            .send()
            .await?;

        let token: TokenResponse = Self::handle_response(response).await?;
        let session = token.into_session(Utc::now())?;
        debug!(user_id = %session.user().id, "Signed in");

        self.store_session(Some(session.clone()), SessionEvent::SignedIn)
            .await;
        Ok(session)
    }

    /// Exchange the stored refresh token for a new session.
    ///
    /// Notifies subscribers with `TokenRefreshed`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unauthorized` if there is no refresh token or
    /// the auth service rejects it.
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<Session, BackendError> {
        let refresh_token = {
            let guard = self.inner.session.read().await;
            guard
                .as_ref()
                .and_then(Session::refresh_token)
                .map(|t| t.expose_secret().to_owned())
                .ok_or(BackendError::Unauthorized)?
        };

        let url = self.token_url("refresh_token")?;
        let response = self
            .inner
            .client
            .post(url)
            .bearer_auth(self.inner.anon_key.expose_secret())
            .json(&RefreshGrant {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        // The auth service answers a spent or revoked refresh token with 400.
        let token: TokenResponse = Self::handle_response(response)
            .await
            .map_err(|e| match e {
                BackendError::Api { status: 400, .. } => BackendError::Unauthorized,
                other => other,
            })?;
        let session = token.into_session(Utc::now())?;

        self.store_session(Some(session.clone()), SessionEvent::TokenRefreshed)
            .await;
        Ok(session)
    }

    fn token_url(&self, grant_type: &str) -> Result<Url, BackendError> {
        let mut url = self.inner.base_url.join("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }

    /// Replace the stored session and announce the change.
    async fn store_session(&self, session: Option<Session>, event: SessionEvent) {
        *self.inner.session.write().await = session.clone();
        // No receivers is not an error: nobody is listening yet.
        let _ = self.inner.changes.send(SessionChange::new(event, session));
    }

    /// Bearer token for table and procedure requests.
    async fn bearer(&self) -> String {
        self.inner.session.read().await.as_ref().map_or_else(
            || self.inner.anon_key.expose_secret().to_owned(),
            |s| s.access_token().expose_secret().to_owned(),
        )
    }

    // =========================================================================
    // Response handling
    // =========================================================================

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()));
        }
        Err(Self::error_for(status, response).await)
    }

    async fn error_for(status: StatusCode, response: reqwest::Response) -> BackendError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
            // The table API answers 406 when a single-object request matched nothing.
            StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE => BackendError::NotFound,
            _ => {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorBody>(&text)
                    .ok()
                    .and_then(ErrorBody::into_message)
                    .unwrap_or(text);
                BackendError::Api {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }
}

#[async_trait]
impl SessionApi for RestBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let stored = self.inner.session.read().await.clone();
        let Some(session) = stored else {
            return Ok(None);
        };

        if !session.is_expired_at(Utc::now()) {
            return Ok(Some(session));
        }

        if session.refresh_token().is_none() {
            debug!(user_id = %session.user().id, "Stored session expired without refresh token");
            self.store_session(None, SessionEvent::SignedOut).await;
            return Ok(None);
        }

        match self.refresh_session().await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(BackendError::Unauthorized) => {
                warn!(user_id = %session.user().id, "Refresh token rejected, dropping session");
                self.store_session(None, SessionEvent::SignedOut).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> SessionFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        // Subscribe to the broadcast before reading the stored session so no
        // change can fall between the initial value and the live feed.
        let mut changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let initial = inner.session.read().await.clone();
            if tx
                .send(SessionChange::new(SessionEvent::InitialSession, initial))
                .is_err()
            {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if tx.send(change).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session feed subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = {
            let guard = self.inner.session.read().await;
            guard
                .as_ref()
                .map(|s| s.access_token().expose_secret().to_owned())
        };

        if let Some(token) = token {
            let url = self.inner.base_url.join("auth/v1/logout")?;
            let response = self
                .inner
                .client
                .post(url)
                .bearer_auth(token)
                .send()
                .await?;

            let status = response.status();
            // An already-invalid token means the session is gone server-side.
            if !status.is_success() && status != StatusCode::UNAUTHORIZED {
                return Err(Self::error_for(status, response).await);
            }
        }

        self.store_session(None, SessionEvent::SignedOut).await;
        Ok(())
    }
}

#[async_trait]
impl QueryApi for RestBackend {
    #[instrument(skip(self, filters), fields(table = %table))]
    async fn select_one(&self, table: &str, filters: &[Filter]) -> Result<Option<Value>, BackendError> {
        let mut url = self.inner.base_url.join("rest/v1/")?.join(table)?;
        {
            let mut query = url.query_pairs_mut();
            for filter in filters {
                query.append_pair(filter.column(), &format!("eq.{}", filter.value()));
            }
            query.append_pair("select", "*");
            // Two is enough to tell "one" from "many".
            query.append_pair("limit", "2");
        }

        let response = self
            .inner
            .client
            .get(url)
            .bearer_auth(self.bearer().await)
            .send()
            .await?;

        let mut rows: Vec<Value> = Self::handle_response(response).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(BackendError::Cardinality(n)),
        }
    }
}

#[async_trait]
impl RpcApi for RestBackend {
    #[instrument(skip(self, args), fields(procedure = %procedure))]
    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError> {
        let url = self.inner.base_url.join("rest/v1/rpc/")?.join(procedure)?;
        let response = self
            .inner
            .client
            .post(url)
            .bearer_auth(self.bearer().await)
            .json(&args)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Self::handle_response(response).await
    }
}
