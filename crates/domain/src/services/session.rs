//! Session-scoped push context.
//!
//! One [`PushSession`] exists per signed-in user and device. It carries the
//! registration state and the current token, and it is created on sign-in
//! and dropped on sign-out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::models::DeviceEnvironment;

/// Registration state of the current device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationState {
    Unregistered,
    PermissionPending,
    Registered,
    Enabled,
    Disabled,
    Refreshing,
}

impl RegistrationState {
    /// States in which a provider or registry round-trip is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RegistrationState::PermissionPending | RegistrationState::Refreshing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "UNREGISTERED",
            RegistrationState::PermissionPending => "PERMISSION_PENDING",
            RegistrationState::Registered => "REGISTERED",
            RegistrationState::Enabled => "ENABLED",
            RegistrationState::Disabled => "DISABLED",
            RegistrationState::Refreshing => "REFRESHING",
        }
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable part of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: RegistrationState,
    pub current_token: Option<String>,
}

/// Push context of one signed-in user on one device.
#[derive(Debug)]
pub struct PushSession {
    user_id: String,
    environment: DeviceEnvironment,
    started_at: DateTime<Utc>,
    inner: RwLock<SessionSnapshot>,
    /// Serializes lifecycle operations of this session.
    op_lock: Mutex<()>,
}

impl PushSession {
    pub fn new(user_id: impl Into<String>, environment: DeviceEnvironment) -> Self {
        Self {
            user_id: user_id.into(),
            environment,
            started_at: Utc::now(),
            inner: RwLock::new(SessionSnapshot {
                state: RegistrationState::Unregistered,
                current_token: None,
            }),
            op_lock: Mutex::new(()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn environment(&self) -> &DeviceEnvironment {
        &self.environment
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> RegistrationState {
        self.snapshot().state
    }

    pub fn current_token(&self) -> Option<String> {
        self.snapshot().current_token
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_state(&self, state: RegistrationState) {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).state = state;
    }

    pub(crate) fn set_token(&self, token: Option<String>) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .current_token = token;
    }

    /// Atomically move from a non-pending state into `pending`.
    ///
    /// Returns the previous state, or `None` if an operation is in flight.
    pub(crate) fn begin(&self, pending: RegistrationState) -> Option<RegistrationState> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.state.is_pending() {
            return None;
        }
        let previous = inner.state;
        inner.state = pending;
        Some(previous)
    }

    pub(crate) fn try_lock_ops(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.op_lock.try_lock().ok()
    }
}

/// Sessions keyed by user id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<PushSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, replacing any previous session of the user.
    pub fn sign_in(&self, user_id: &str, environment: DeviceEnvironment) -> Arc<PushSession> {
        let session = Arc::new(PushSession::new(user_id, environment));
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), session.clone());
        tracing::info!(user_id = %user_id, "Push session started");
        session
    }

    /// End a session. Returns it if one existed.
    pub fn sign_out(&self, user_id: &str) -> Option<Arc<PushSession>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        if removed.is_some() {
            tracing::info!(user_id = %user_id, "Push session ended");
        }
        removed
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<PushSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
