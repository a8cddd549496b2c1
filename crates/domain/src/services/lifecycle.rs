//! Token lifecycle coordinator.
//!
//! Drives the per-device registration state machine:
//!
//! ```text
//! UNREGISTERED -> PERMISSION_PENDING -> REGISTERED -> ENABLED <-> DISABLED
//!                        |                              |
//!                        +-> UNREGISTERED               +-> REFRESHING -> ENABLED
//! ENABLED | DISABLED -> UNREGISTERED   (disable all)
//! ```
//!
//! Provider and registry calls are bounded by the operation timeout. A
//! provider failure never touches the registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared::validation::token_prefix;
use tracing::{debug, info, warn};

use crate::models::{DeviceFields, DeviceRecord};
use crate::services::consolidation::{ConsolidationReport, DeviceConsolidator};
use crate::services::push_provider::{PermissionState, ProviderError, PushProvider, TokenOptions};
use crate::services::registry::{DeviceRegistryClient, RegistryError};
use crate::services::session::{PushSession, RegistrationState};

/// Default bound on one provider or registry call.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 15;

/// Error type for lifecycle operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Notification permission prompt dismissed")]
    PermissionDismissed,

    #[error("Push provider returned no token")]
    TokenUnavailable,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Operation timed out: {operation}")]
    Timeout { operation: &'static str },

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: RegistrationState,
        action: &'static str,
    },

    #[error("Another notification operation is in progress")]
    Busy,
}

impl LifecycleError {
    /// Actionable copy, distinct per error kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            LifecycleError::PermissionDenied => {
                "Notifications are blocked. Allow notifications for this site in your browser settings and try again."
            }
            LifecycleError::PermissionDismissed => {
                "Notifications were not enabled. Allow notifications when your browser asks to finish setup."
            }
            LifecycleError::TokenUnavailable | LifecycleError::Provider(_) => {
                "Could not reach the notification service. Check your connection and try again."
            }
            LifecycleError::Registry(e) => e.user_message(),
            LifecycleError::Timeout { .. } => "The request took too long. Please try again.",
            LifecycleError::InvalidTransition { .. } => {
                "This action is not available right now. Reload your notification settings."
            }
            LifecycleError::Busy => "Another notification settings change is still in progress.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::PermissionDenied | LifecycleError::InvalidTransition { .. } => false,
            LifecycleError::Registry(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Result of a forced token refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub record: DeviceRecord,
    /// Stale records deleted before the new one was written.
    pub replaced: usize,
    /// Stale records whose deletion failed.
    pub stale_remaining: usize,
}

/// Result of a state sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub state: RegistrationState,
    pub permission: PermissionState,
    pub current_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationReport>,
}

/// Coordinates the push provider and the device registry for a session.
#[derive(Clone)]
pub struct TokenLifecycleCoordinator {
    provider: Arc<dyn PushProvider>,
    registry: DeviceRegistryClient,
    consolidator: DeviceConsolidator,
    timeout: Duration,
}

impl TokenLifecycleCoordinator {
    pub fn new(provider: Arc<dyn PushProvider>, registry: DeviceRegistryClient) -> Self {
        Self {
            provider,
            consolidator: DeviceConsolidator::new(registry.clone()),
            registry,
            timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &DeviceRegistryClient {
        &self.registry
    }

    /// Opt the current device in.
    ///
    /// Requests permission, acquires a token and registers it. Any failure
    /// reverts the session to `UNREGISTERED`.
    pub async fn enable(
        &self,
        session: &PushSession,
        name: Option<String>,
    ) -> Result<DeviceRecord, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let from = session.state();
        if from != RegistrationState::Unregistered {
            return Err(LifecycleError::InvalidTransition {
                from,
                action: "enable notifications",
            });
        }
        session
            .begin(RegistrationState::PermissionPending)
            .ok_or(LifecycleError::Busy)?;
        self.log_transition(session, from, RegistrationState::PermissionPending);

        match self.register(session, name).await {
            Ok(record) => {
                session.set_token(Some(record.token.clone()));
                session.set_state(RegistrationState::Registered);
                self.log_transition(
                    session,
                    RegistrationState::PermissionPending,
                    RegistrationState::Registered,
                );
                session.set_state(RegistrationState::Enabled);
                self.log_transition(session, RegistrationState::Registered, RegistrationState::Enabled);
                Ok(record)
            }
            Err(e) => {
                session.set_state(RegistrationState::Unregistered);
                warn!(user_id = %session.user_id(), error = %e, "Registration failed, reverting");
                Err(e)
            }
        }
    }

    async fn register(
        &self,
        session: &PushSession,
        name: Option<String>,
    ) -> Result<DeviceRecord, LifecycleError> {
        let permission = self
            .bounded("request permission", self.provider.request_permission())
            .await?;
        match permission {
            PermissionState::Granted => {}
            PermissionState::Denied => return Err(LifecycleError::PermissionDenied),
            PermissionState::Default => return Err(LifecycleError::PermissionDismissed),
        }

        let token = self
            .bounded(
                "acquire token",
                self.provider.acquire_token(TokenOptions::default()),
            )
            .await?
            .ok_or(LifecycleError::TokenUnavailable)?;

        let fields = DeviceFields::from_environment(session.environment()).with_name(name);
        self.bounded(
            "register device",
            self.registry
                .upsert_device(session.user_id(), &token, fields),
        )
        .await
    }

    /// Toggle delivery for one device of the session's user.
    ///
    /// Only the registry flag changes. Toggling the current device moves the
    /// session between `ENABLED` and `DISABLED`.
    pub async fn set_enabled(
        &self,
        session: &PushSession,
        token: &str,
        enabled: bool,
    ) -> Result<DeviceRecord, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let is_current = session.current_token().as_deref() == Some(token);
        let from = session.state();
        if is_current
            && !matches!(
                from,
                RegistrationState::Enabled | RegistrationState::Disabled
            )
        {
            return Err(LifecycleError::InvalidTransition {
                from,
                action: "toggle this device",
            });
        }

        let record = self
            .bounded(
                "update device",
                self.registry.set_enabled(session.user_id(), token, enabled),
            )
            .await?;

        if is_current {
            let to = if enabled {
                RegistrationState::Enabled
            } else {
                RegistrationState::Disabled
            };
            session.set_state(to);
            self.log_transition(session, from, to);
        }
        Ok(record)
    }

    /// Rename one device of the session's user.
    pub async fn rename(
        &self,
        session: &PushSession,
        token: &str,
        name: &str,
    ) -> Result<DeviceRecord, LifecycleError> {
        self.bounded(
            "rename device",
            self.registry.rename(session.user_id(), token, name),
        )
        .await
    }

    /// Remove one device of the session's user. Idempotent.
    pub async fn remove_device(
        &self,
        session: &PushSession,
        token: &str,
    ) -> Result<bool, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let removed = self
            .bounded(
                "remove device",
                self.registry.remove_device(session.user_id(), token),
            )
            .await?;

        if session.current_token().as_deref() == Some(token) {
            let from = session.state();
            session.set_token(None);
            session.set_state(RegistrationState::Unregistered);
            self.log_transition(session, from, RegistrationState::Unregistered);
        }
        Ok(removed)
    }

    /// Forced token refresh.
    ///
    /// Acquires a new token, deletes every existing record of the user and
    /// writes a single fresh record. Deletion failures do not stop the new
    /// record from being written; they are reported as `stale_remaining`.
    pub async fn refresh(&self, session: &PushSession) -> Result<RefreshOutcome, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let from = session.state();
        if from != RegistrationState::Enabled {
            return Err(LifecycleError::InvalidTransition {
                from,
                action: "refresh the delivery token",
            });
        }
        session
            .begin(RegistrationState::Refreshing)
            .ok_or(LifecycleError::Busy)?;
        self.log_transition(session, from, RegistrationState::Refreshing);

        let result = self.replace_all(session).await;
        match &result {
            Ok(outcome) => {
                session.set_token(Some(outcome.record.token.clone()));
                info!(
                    user_id = %session.user_id(),
                    token = %token_prefix(&outcome.record.token),
                    replaced = outcome.replaced,
                    stale_remaining = outcome.stale_remaining,
                    "Delivery token refreshed"
                );
            }
            Err(e) => warn!(user_id = %session.user_id(), error = %e, "Token refresh failed"),
        }
        let to = match &result {
            Ok(_) => RegistrationState::Enabled,
            Err(_) => self.restore_after_failed_refresh(session).await,
        };
        session.set_state(to);
        self.log_transition(session, RegistrationState::Refreshing, to);
        result
    }

    /// State after a refresh that failed part way. Stale records may already
    /// be gone, so the current token only survives if its record still does.
    async fn restore_after_failed_refresh(&self, session: &PushSession) -> RegistrationState {
        let Some(token) = session.current_token() else {
            return RegistrationState::Unregistered;
        };
        match self
            .bounded(
                "get device",
                self.registry.get_device(session.user_id(), &token),
            )
            .await
        {
            Ok(Some(record)) if record.enabled => RegistrationState::Enabled,
            Ok(Some(_)) => RegistrationState::Disabled,
            Ok(None) => {
                session.set_token(None);
                RegistrationState::Unregistered
            }
            Err(e) => {
                warn!(user_id = %session.user_id(), error = %e, "Could not confirm current device after failed refresh");
                session.set_token(None);
                RegistrationState::Unregistered
            }
        }
    }

    async fn replace_all(&self, session: &PushSession) -> Result<RefreshOutcome, LifecycleError> {
        let user_id = session.user_id();
        let token = self
            .bounded(
                "acquire token",
                self.provider.acquire_token(TokenOptions::refresh()),
            )
            .await?
            .ok_or(LifecycleError::TokenUnavailable)?;

        let existing = self
            .bounded("list devices", self.registry.list_devices(user_id))
            .await?;

        let current = session.current_token();
        let name = existing
            .iter()
            .find(|d| Some(&d.token) == current.as_ref())
            .and_then(|d| d.name.clone());

        let mut replaced = 0;
        let mut stale_remaining = 0;
        for device in &existing {
            match self
                .bounded(
                    "remove device",
                    self.registry.remove_device(user_id, &device.token),
                )
                .await
            {
                Ok(_) => replaced += 1,
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        token = %token_prefix(&device.token),
                        error = %e,
                        "Failed to delete stale device during refresh"
                    );
                    stale_remaining += 1;
                }
            }
        }

        let fields = DeviceFields::from_environment(session.environment()).with_name(name);
        let record = self
            .bounded(
                "register device",
                self.registry.upsert_device(user_id, &token, fields),
            )
            .await?;

        Ok(RefreshOutcome {
            record,
            replaced,
            stale_remaining,
        })
    }

    /// Disable all: remove the current device's record entirely.
    pub async fn unregister(&self, session: &PushSession) -> Result<(), LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let from = session.state();
        if !matches!(
            from,
            RegistrationState::Enabled | RegistrationState::Disabled
        ) {
            return Err(LifecycleError::InvalidTransition {
                from,
                action: "disable notifications",
            });
        }

        let user_id = session.user_id();
        if let Some(token) = session.current_token() {
            self.bounded("remove device", self.registry.remove_device(user_id, &token))
                .await?;
        }
        self.bounded("clear token", self.registry.clear_current_token(user_id))
            .await?;

        session.set_token(None);
        session.set_state(RegistrationState::Unregistered);
        self.log_transition(session, from, RegistrationState::Unregistered);
        Ok(())
    }

    /// Remove duplicate records of the user's devices.
    ///
    /// The current device is stamped as seen first, so its own record is the
    /// one its fingerprint group keeps.
    pub async fn consolidate(
        &self,
        session: &PushSession,
    ) -> Result<ConsolidationReport, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let user_id = session.user_id();
        if let Some(token) = session.current_token() {
            if let Err(e) = self.bounded("touch device", self.registry.touch(user_id, &token)).await {
                debug!(user_id = %user_id, error = %e, "Failed to stamp lastSeenAt");
            }
        }
        self.bounded("consolidate devices", self.consolidator.consolidate(user_id))
            .await
    }

    /// Derive the session's state from runtime permission and the registry,
    /// then run a consolidation pass.
    ///
    /// Consolidation failures are logged and leave `consolidation` empty.
    pub async fn sync_state(&self, session: &PushSession) -> Result<SyncReport, LifecycleError> {
        let _ops = session.try_lock_ops().ok_or(LifecycleError::Busy)?;
        let user_id = session.user_id();
        let from = session.state();

        let permission = tokio::time::timeout(self.timeout, self.provider.permission_state())
            .await
            .map_err(|_| LifecycleError::Timeout {
                operation: "read permission",
            })?;

        let mut token = None;
        let mut state = RegistrationState::Unregistered;
        if permission == PermissionState::Granted {
            let candidate = match session.current_token() {
                Some(t) => Some(t),
                None => {
                    self.bounded(
                        "acquire token",
                        self.provider.acquire_token(TokenOptions::default()),
                    )
                    .await?
                }
            };
            if let Some(candidate) = candidate {
                let record = self
                    .bounded("get device", self.registry.get_device(user_id, &candidate))
                    .await?;
                if let Some(record) = record {
                    state = if record.enabled {
                        RegistrationState::Enabled
                    } else {
                        RegistrationState::Disabled
                    };
                    if let Err(e) = self.registry.touch(user_id, &candidate).await {
                        debug!(user_id = %user_id, error = %e, "Failed to stamp lastSeenAt");
                    }
                    token = Some(candidate);
                }
            }
        }

        session.set_token(token.clone());
        session.set_state(state);
        if from != state {
            self.log_transition(session, from, state);
        }

        let consolidation = match self
            .bounded("consolidate devices", self.consolidator.consolidate(user_id))
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Consolidation during sync failed");
                None
            }
        };

        Ok(SyncReport {
            state,
            permission,
            current_token: token,
            consolidation,
        })
    }

    async fn bounded<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T, LifecycleError>
    where
        F: Future<Output = Result<T, E>>,
        LifecycleError: From<E>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(LifecycleError::from),
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Operation timed out");
                Err(LifecycleError::Timeout { operation })
            }
        }
    }

    fn log_transition(&self, session: &PushSession, from: RegistrationState, to: RegistrationState) {
        info!(user_id = %session.user_id(), from = %from, to = %to, "Registration state changed");
    }
}
