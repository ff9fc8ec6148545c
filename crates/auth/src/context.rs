//! Auth context: the single owner of the back-office's authentication state.
//!
//! The context composes the session store, the resolvers, and the audit
//! logger into one state machine:
//!
//! ```text
//! Uninitialized -> Resolving -> Ready(Authenticated | Anonymous)
//! ```
//!
//! State lives in a [`watch`] channel. Consumers read snapshots and observe
//! changes; only the context writes.
//!
//! # Staleness
//!
//! Resolution passes run concurrently with session changes, refreshes, and
//! sign-outs. Every session transition advances an epoch, and every pass
//! carries the epoch, user, and sequence number it was started with. A pass
//! publishes only if the context is still mounted, its epoch and user are
//! still current, and no later pass has published already. Checks and writes
//! happen together inside a single [`watch::Sender::send_if_modified`], so no
//! stale result can slip in between.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use clinic_core::{Role, UserId};

use crate::audit::{AuditDetails, AuditKind, AuditLogger};
use crate::backend::{QueryApi, RpcApi, SessionApi};
use crate::config::ResourceNames;
use crate::error::AuthError;
use crate::models::{Profile, Session, SessionEvent, User};
use crate::profile::ProfileResolver;
use crate::role::{RoleResolver, RoleSettings};
use crate::session::{SessionStore, Subscription};

/// Collaborators the context is built from.
#[derive(Clone)]
pub struct AuthServices {
    pub sessions: SessionStore,
    pub profiles: ProfileResolver,
    pub roles: RoleResolver,
    pub audit: AuditLogger,
}

impl AuthServices {
    /// Wire every service to one backend.
    pub fn from_backend<B>(backend: Arc<B>, names: &ResourceNames) -> Self
    where
        B: SessionApi + QueryApi + RpcApi + 'static,
    {
        Self {
            sessions: SessionStore::new(backend.clone()),
            profiles: ProfileResolver::new(backend.clone(), names.profiles_table.clone()),
            roles: RoleResolver::new(backend.clone(), backend.clone(), RoleSettings::from(names)),
            audit: AuditLogger::new(backend, names.audit_fn.clone()),
        }
    }
}

/// Whether a settled context has a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Authenticated,
    Anonymous,
}

/// Lifecycle position of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// Nothing known yet.
    #[default]
    Uninitialized,
    /// A user is known but their profile and role are not published yet.
    Resolving,
    Ready(Readiness),
}

/// Point-in-time view of the authentication state.
///
/// Whenever `user` is absent, `profile` and `role` are absent too.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    user: Option<User>,
    session: Option<Session>,
    profile: Option<Profile>,
    role: Option<Role>,
    is_loading: bool,
    phase: AuthPhase,
    epoch: u64,
    last_pass: u64,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

impl AuthSnapshot {
    /// State before anything has been resolved.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            user: None,
            session: None,
            profile: None,
            role: None,
            is_loading: true,
            phase: AuthPhase::Uninitialized,
            epoch: 0,
            last_pass: 0,
        }
    }

    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Effective role. `Admin` only ever appears after server-side
    /// confirmation.
    #[must_use]
    pub const fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.is_some() && self.role.as_ref().is_some_and(Role::is_admin)
    }

    /// True until the first resolution pass completes, false ever after.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.is_loading
    }

    #[must_use]
    pub const fn phase(&self) -> AuthPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn clear(&mut self) {
        self.user = None;
        self.session = None;
        self.profile = None;
        self.role = None;
        self.is_loading = false;
        self.phase = AuthPhase::Ready(Readiness::Anonymous);
    }
}

/// Identifies one resolution pass.
#[derive(Debug, Clone, Copy)]
struct Pass {
    epoch: u64,
    user_id: UserId,
    number: u64,
}

struct Inner {
    services: AuthServices,
    state: watch::Sender<AuthSnapshot>,
    mounted: AtomicBool,
    torn_down: AtomicBool,
    passes: AtomicU64,
    subscription: OnceLock<Subscription>,
}

impl Inner {
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn next_pass(&self) -> u64 {
        self.passes.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Apply a session transition.
    ///
    /// With `expected_epoch` set, the transition is dropped if any other
    /// transition happened since that epoch was read. Returns the pass to run
    /// when a session is present.
    fn transition(&self, session: Option<Session>, expected_epoch: Option<u64>) -> Option<Pass> {
        let mut pass = None;
        self.state.send_if_modified(|state| {
            if self.is_torn_down() || expected_epoch.is_some_and(|epoch| epoch != state.epoch) {
                return false;
            }
            state.epoch += 1;

            match session {
                Some(session) => {
                    let user = session.user().clone();
                    if state.user.as_ref().is_none_or(|current| current.id != user.id) {
                        state.profile = None;
                        state.role = None;
                        state.phase = AuthPhase::Resolving;
                    }
                    pass = Some(Pass {
                        epoch: state.epoch,
                        user_id: user.id,
                        number: self.next_pass(),
                    });
                    state.user = Some(user);
                    state.session = Some(session);
                }
                None => state.clear(),
            }
            true
        });
        pass
    }

    /// Run the profile and role resolvers together and publish both at once.
    async fn resolve(&self, pass: Pass) {
        let (profile, role) = tokio::join!(
            self.services.profiles.fetch_profile(pass.user_id),
            self.services.roles.resolve_role(pass.user_id),
        );
        self.publish(pass, profile, role);
    }

    fn publish(&self, pass: Pass, profile: Option<Profile>, role: Role) {
        let published = self.state.send_if_modified(|state| {
            let current = !self.is_torn_down()
                && state.epoch == pass.epoch
                && state.user.as_ref().is_some_and(|user| user.id == pass.user_id)
                && pass.number > state.last_pass;
            if !current {
                return false;
            }

            state.profile = profile;
            state.role = Some(role);
            state.last_pass = pass.number;
            state.is_loading = false;
            state.phase = AuthPhase::Ready(Readiness::Authenticated);
            true
        });

        if published {
            debug!(user_id = %pass.user_id, pass = pass.number, "Published resolution");
        } else {
            debug!(user_id = %pass.user_id, pass = pass.number, "Discarded stale resolution");
        }
    }

    fn on_change(self: Arc<Self>, event: SessionEvent, session: Option<Session>) {
        if self.is_torn_down() {
            return;
        }

        let session = match event {
            SessionEvent::SignedOut => None,
            _ => session,
        };

        if event == SessionEvent::SignedIn {
            if let Some(user) = session.as_ref().map(Session::user) {
                info!(user_id = %user.id, "User signed in");
                self.services.audit.spawn_record(
                    AuditKind::UserLogin,
                    AuditDetails::now(user.id, user.email.clone()),
                );
            }
        }

        if let Some(pass) = self.transition(session, None) {
            // Resolution runs on its own task, never inside the feed callback.
            tokio::spawn(async move { self.resolve(pass).await });
        }
    }

    async fn probe(self: Arc<Self>) {
        let epoch = self.state.borrow().epoch;
        let Ok(session) = self.services.sessions.get_current_session().await else {
            // Unknown is not anonymous: keep whatever is there.
            return;
        };

        if let Some(pass) = self.transition(session, Some(epoch)) {
            self.resolve(pass).await;
        }
    }
}

/// Shared handle to the authentication state.
///
/// Cheap to clone. Construct once per application and pass it down.
#[derive(Clone)]
pub struct AuthContext {
    inner: Arc<Inner>,
}

impl AuthContext {
    #[must_use]
    pub fn new(services: AuthServices) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::initial());
        Self {
            inner: Arc::new(Inner {
                services,
                state,
                mounted: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                passes: AtomicU64::new(0),
                subscription: OnceLock::new(),
            }),
        }
    }

    /// Start tracking the session: subscribe to changes and probe the
    /// current session.
    ///
    /// Must be called inside a Tokio runtime. Calling it again, or after
    /// [`teardown`](Self::teardown), does nothing.
    pub fn mount(&self) {
        if self.inner.is_torn_down() || self.inner.mounted.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscription = self
            .inner
            .services
            .sessions
            .on_session_change(move |event, session| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_change(event, session);
                }
            });
        if self.inner.subscription.set(subscription).is_err() {
            warn!("Session subscription already registered");
        }

        tokio::spawn(Arc::clone(&self.inner).probe());
        debug!("Auth context mounted");
    }

    /// Stop tracking. No state is written after this returns, including by
    /// passes already in flight.
    pub fn teardown(&self) {
        // Flipped under the state lock so an in-flight write either lands
        // before this returns or sees the flag.
        let mut already = false;
        self.inner.state.send_if_modified(|_| {
            already = self.inner.torn_down.swap(true, Ordering::AcqRel);
            false
        });
        if already {
            return;
        }
        if let Some(subscription) = self.inner.subscription.get() {
            subscription.dispose();
        }
        debug!("Auth context torn down");
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Observe every published state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    /// Wait for the first resolution pass to complete.
    ///
    /// Never returns on a context whose session probe failed and that never
    /// sees a session change.
    pub async fn wait_until_ready(&self) -> AuthSnapshot {
        self.wait_until(|snapshot| !snapshot.is_loading()).await
    }

    /// Wait until `predicate` holds for the published state.
    pub async fn wait_until(&self, predicate: impl FnMut(&AuthSnapshot) -> bool) -> AuthSnapshot {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(predicate).await {
            Ok(snapshot) => AuthSnapshot::clone(&snapshot),
            // The sender lives as long as `self`.
            Err(_) => self.snapshot(),
        }
    }

    /// Re-resolve the profile and role of the current user.
    ///
    /// The session is left alone. Does nothing while no one is signed in.
    pub async fn refresh(&self) {
        if self.inner.is_torn_down() {
            return;
        }

        let pass = {
            let state = self.inner.state.borrow();
            let Some(user) = state.user.as_ref() else {
                debug!("Refresh skipped, no user");
                return;
            };
            Pass {
                epoch: state.epoch,
                user_id: user.id,
                number: self.inner.next_pass(),
            }
        };
        self.inner.resolve(pass).await;
    }

    /// Sign out of the backend.
    ///
    /// A `user_logout` audit entry is attempted first, while the session is
    /// still valid; an unanswered audit write is abandoned after the audit
    /// logger's timeout. On success every state field is cleared.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::SignOutFailed` if the backend refuses. State is
    /// left unchanged in that case.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(user) = self.user() {
            self.inner
                .services
                .audit
                .record_event(
                    AuditKind::UserLogout,
                    AuditDetails::now(user.id, user.email.clone()),
                )
                .await;
        }

        if let Err(e) = self.inner.services.sessions.sign_out().await {
            warn!(error = %e, "Sign-out failed");
            return Err(e);
        }

        self.inner.transition(None, None);
        info!("Signed out");
        Ok(())
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.inner.state.borrow().role.clone()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.inner.state.borrow().is_admin()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.inner.state.borrow().phase
    }
}
