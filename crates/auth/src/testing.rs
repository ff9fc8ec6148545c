//! In-memory backend for unit tests.
//!
//! Unlike [`RestBackend`](crate::backend::RestBackend), subscribing does not
//! replay an `INITIAL_SESSION`; tests emit every change explicitly.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use clinic_core::{Email, UserId};

use crate::backend::{BackendError, Filter, QueryApi, RpcApi, SessionApi, SessionFeed};
use crate::config::ResourceNames;
use crate::models::{Session, SessionChange, SessionEvent, User};

/// A user with a fresh random ID.
pub fn user(email: &str) -> User {
    User::new(UserId::new(Uuid::new_v4()), Email::parse(email).ok())
}

/// A session for `user` with a token derived from its ID.
pub fn session_for(user: &User) -> Session {
    Session::new(user.clone(), SecretString::from(format!("token-{}", user.id)))
}

/// How a scripted table query fails.
#[derive(Debug, Clone, Copy)]
pub enum TableFailure {
    NotFound,
    Unavailable,
}

/// Scripted answer of the authority check.
#[derive(Debug, Clone)]
pub enum Authority {
    Confirm,
    Deny,
    Fail,
    Answer(Value),
}

/// Holds queries for one user (or the session probe) until released.
///
/// Dropping the gate releases it too.
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (open, rx) = watch::channel(false);
        (Self { open }, rx)
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

async fn pass(gate: Option<watch::Receiver<bool>>) {
    if let Some(mut gate) = gate {
        let _ = gate.wait_for(|open| *open).await;
    }
}

fn unavailable(what: &str) -> BackendError {
    BackendError::Api {
        status: 503,
        message: format!("{what} unavailable"),
    }
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    probe_fails: bool,
    probe_gate: Option<watch::Receiver<bool>>,
    profiles: HashMap<UserId, Value>,
    roles: HashMap<UserId, Vec<Value>>,
    table_failures: HashMap<String, TableFailure>,
    authority: HashMap<UserId, Authority>,
    holds: HashMap<UserId, watch::Receiver<bool>>,
    queries: usize,
    rpc_calls: Vec<(String, Value)>,
    audit_fails: bool,
    audit_gate: Option<watch::Receiver<bool>>,
    sign_out_fails: bool,
    sign_outs: usize,
    listeners: Vec<mpsc::UnboundedSender<SessionChange>>,
}

impl State {
    fn broadcast(&mut self, change: &SessionChange) {
        self.listeners
            .retain(|listener| listener.send(change.clone()).is_ok());
    }
}

/// Scriptable stand-in for the hosted backend.
pub struct FakeBackend {
    names: ResourceNames,
    state: Mutex<State>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            names: ResourceNames::default(),
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // Sessions

    pub fn set_session(&self, session: Option<Session>) {
        self.state().session = session;
    }

    pub fn fail_probe(&self, fail: bool) {
        self.state().probe_fails = fail;
    }

    pub fn hold_probe(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.state().probe_gate = Some(rx);
        gate
    }

    /// Store `session` and push the change to every subscriber.
    pub fn emit(&self, event: SessionEvent, session: Option<Session>) {
        let mut state = self.state();
        state.session = session.clone();
        state.broadcast(&SessionChange::new(event, session));
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.state().sign_out_fails = fail;
    }

    pub fn sign_outs(&self) -> usize {
        self.state().sign_outs
    }

    // Tables

    pub fn set_profile(&self, user: &User, full_name: &str) {
        let row = json!({
            "id": user.id,
            "full_name": full_name,
            "email": user.email,
        });
        self.set_raw_profile(user, row);
    }

    pub fn set_raw_profile(&self, user: &User, row: Value) {
        self.state().profiles.insert(user.id, row);
    }

    /// Replace the role assignment of `user`.
    pub fn set_role(&self, user: &User, label: &str) {
        let row = json!({ "user_id": user.id, "role": label });
        self.state().roles.insert(user.id, vec![row]);
    }

    /// Add another role assignment row for `user`.
    pub fn add_role_row(&self, user: &User, label: &str) {
        let row = json!({ "user_id": user.id, "role": label });
        self.state().roles.entry(user.id).or_default().push(row);
    }

    pub fn fail_table(&self, table: &str, failure: TableFailure) {
        self.state()
            .table_failures
            .insert(table.to_string(), failure);
    }

    /// Hold every query about `user` until the gate is released.
    pub fn hold_user(&self, user: &User) -> Gate {
        let (gate, rx) = Gate::new();
        self.state().holds.insert(user.id, rx);
        gate
    }

    pub fn queries(&self) -> usize {
        self.state().queries
    }

    // Procedures

    pub fn set_authority(&self, user: &User, answer: Authority) {
        self.state().authority.insert(user.id, answer);
    }

    pub fn fail_audit(&self, fail: bool) {
        self.state().audit_fails = fail;
    }

    /// Leave audit writes unanswered until the gate is released.
    pub fn hold_audit(&self) -> Gate {
        let (gate, rx) = Gate::new();
        self.state().audit_gate = Some(rx);
        gate
    }

    pub fn rpc_calls(&self) -> Vec<(String, Value)> {
        self.state().rpc_calls.clone()
    }

    pub fn authority_calls(&self, user: &User) -> usize {
        let id = user.id.to_string();
        self.state()
            .rpc_calls
            .iter()
            .filter(|(procedure, args)| {
                *procedure == self.names.role_check_fn && args["_user_id"] == id.as_str()
            })
            .count()
    }

    pub fn audit_actions(&self) -> Vec<String> {
        self.state()
            .rpc_calls
            .iter()
            .filter(|(procedure, _)| *procedure == self.names.audit_fn)
            .filter_map(|(_, args)| args["_action"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl SessionApi for FakeBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let gate = self.state().probe_gate.clone();
        pass(gate).await;

        let state = self.state();
        if state.probe_fails {
            return Err(unavailable("auth service"));
        }
        Ok(state.session.clone())
    }

    fn subscribe(&self) -> SessionFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().listeners.push(tx);
        rx
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        if state.sign_out_fails {
            return Err(unavailable("auth service"));
        }
        state.sign_outs += 1;
        state.session = None;
        state.broadcast(&SessionChange::new(SessionEvent::SignedOut, None));
        Ok(())
    }
}

#[async_trait]
impl QueryApi for FakeBackend {
    async fn select_one(&self, table: &str, filters: &[Filter]) -> Result<Option<Value>, BackendError> {
        let user_id: UserId = filters
            .first()
            .and_then(|filter| filter.value().parse().ok())
            .ok_or_else(|| BackendError::Decode("expected a user ID filter".to_string()))?;

        let gate = self.state().holds.get(&user_id).cloned();
        pass(gate).await;

        let mut state = self.state();
        state.queries += 1;

        if let Some(failure) = state.table_failures.get(table) {
            return Err(match failure {
                TableFailure::NotFound => BackendError::NotFound,
                TableFailure::Unavailable => unavailable(table),
            });
        }

        let mut rows: Vec<Value> = if table == self.names.profiles_table {
            state.profiles.get(&user_id).cloned().into_iter().collect()
        } else if table == self.names.roles_table {
            state.roles.get(&user_id).cloned().unwrap_or_default()
        } else {
            return Err(BackendError::Api {
                status: 404,
                message: format!("unknown table {table}"),
            });
        };

        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            n => Err(BackendError::Cardinality(n)),
        }
    }
}

#[async_trait]
impl RpcApi for FakeBackend {
    async fn call(&self, procedure: &str, args: Value) -> Result<Value, BackendError> {
        let gate = {
            let mut state = self.state();
            state.rpc_calls.push((procedure.to_string(), args.clone()));
            state.audit_gate.clone()
        };
        if procedure == self.names.audit_fn {
            pass(gate).await;
        }

        let state = self.state();
        if procedure == self.names.audit_fn {
            return if state.audit_fails {
                Err(unavailable("audit log"))
            } else {
                Ok(Value::Null)
            };
        }

        if procedure == self.names.role_check_fn {
            let answer = args["_user_id"]
                .as_str()
                .and_then(|id| id.parse::<UserId>().ok())
                .and_then(|id| state.authority.get(&id).cloned())
                .unwrap_or(Authority::Deny);
            return match answer {
                Authority::Confirm => Ok(Value::Bool(true)),
                Authority::Deny => Ok(Value::Bool(false)),
                Authority::Fail => Err(unavailable("authority check")),
                Authority::Answer(value) => Ok(value),
            };
        }

        Err(BackendError::Api {
            status: 404,
            message: format!("unknown procedure {procedure}"),
        })
    }
}
