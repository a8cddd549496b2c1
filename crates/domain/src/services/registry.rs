//! Device registry client.
//!
//! Typed access to the per-user device sub-mapping on the remote profile
//! store. Every mutation is followed by a refresh of the profile's push
//! summary mirror; mirror failures are logged and never fail the mutation.

use std::sync::Arc;

use shared::validation::{token_prefix, validate_delivery_token, validate_device_name};
use tracing::{debug, info, warn};

use crate::models::{DeviceFields, DevicePatch, DeviceRecord, PushSummary};
use crate::services::clock::Clock;
use crate::services::profile_store::{DeviceOrder, ProfileStore, StoreError};

/// Error type for registry operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Device not found")]
    NotFound,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Device registry is unreachable: {0}")]
    Unavailable(String),

    #[error("Device registry error: {0}")]
    Backend(String),
}

impl RegistryError {
    /// Copy suitable for showing next to a retry affordance.
    pub fn user_message(&self) -> &'static str {
        match self {
            RegistryError::NotFound => {
                "This device is no longer registered. Refresh the device list."
            }
            RegistryError::InvalidInput(_) => "Please check the value you entered.",
            RegistryError::Unavailable(_) | RegistryError::Backend(_) => {
                "Could not save your device settings. Your changes were kept, please try again."
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Unavailable(_) | RegistryError::Backend(_)
        )
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => RegistryError::Unavailable(msg),
            StoreError::Backend(msg) => RegistryError::Backend(msg),
            StoreError::IndexUnavailable => {
                RegistryError::Backend("ordering index is not available".to_string())
            }
        }
    }
}

/// Client for a user's device records.
#[derive(Clone)]
pub struct DeviceRegistryClient {
    store: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
}

impl DeviceRegistryClient {
    pub fn new(store: Arc<dyn ProfileStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// All records of a user, most recently seen first when the store can
    /// order them. Falls back to an unordered scan otherwise.
    pub async fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>, RegistryError> {
        match self
            .store
            .query_devices(user_id, DeviceOrder::LastSeenDesc)
            .await
        {
            Ok(records) => Ok(records),
            Err(StoreError::IndexUnavailable) => {
                warn!(user_id = %user_id, "lastSeenAt index unavailable, listing devices unordered");
                Ok(self
                    .store
                    .query_devices(user_id, DeviceOrder::Unordered)
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a single record.
    pub async fn get_device(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<DeviceRecord>, RegistryError> {
        Ok(self.store.get_device(user_id, token).await?)
    }

    /// Create or overwrite the record keyed by `token` and mark it as the
    /// profile's current token.
    pub async fn upsert_device(
        &self,
        user_id: &str,
        token: &str,
        fields: DeviceFields,
    ) -> Result<DeviceRecord, RegistryError> {
        validate_delivery_token(token)
            .map_err(|e| RegistryError::InvalidInput(validation_message(&e)))?;

        let now = self.clock.now();
        let created_at = self
            .store
            .get_device(user_id, token)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let record = DeviceRecord {
            token: token.to_string(),
            name: fields.name,
            platform: fields.platform,
            user_agent: fields.user_agent,
            enabled: fields.enabled,
            created_at,
            last_seen_at: now,
        };
        self.store.put_device(user_id, &record).await?;

        info!(
            user_id = %user_id,
            token = %token_prefix(token),
            enabled = record.enabled,
            "Device upserted"
        );
        self.refresh_summary(user_id, Some(token)).await;
        Ok(record)
    }

    /// Toggle delivery for one device.
    pub async fn set_enabled(
        &self,
        user_id: &str,
        token: &str,
        enabled: bool,
    ) -> Result<DeviceRecord, RegistryError> {
        let patch = DevicePatch {
            enabled: Some(enabled),
            ..Default::default()
        };
        let record = self.patch(user_id, token, &patch).await?;
        info!(user_id = %user_id, token = %token_prefix(token), enabled, "Device toggled");
        Ok(record)
    }

    /// Rename one device.
    pub async fn rename(
        &self,
        user_id: &str,
        token: &str,
        name: &str,
    ) -> Result<DeviceRecord, RegistryError> {
        validate_device_name(name)
            .map_err(|e| RegistryError::InvalidInput(validation_message(&e)))?;
        let patch = DevicePatch {
            name: Some(name.trim().to_string()),
            ..Default::default()
        };
        let record = self.patch(user_id, token, &patch).await?;
        info!(user_id = %user_id, token = %token_prefix(token), "Device renamed");
        Ok(record)
    }

    /// Stamp `lastSeenAt = now` on an existing record.
    pub async fn touch(&self, user_id: &str, token: &str) -> Result<DeviceRecord, RegistryError> {
        let patch = DevicePatch {
            last_seen_at: Some(self.clock.now()),
            ..Default::default()
        };
        self.store
            .update_device(user_id, token, &patch)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    /// Delete a record. Removing a missing record succeeds.
    ///
    /// Returns whether a record was actually deleted.
    pub async fn remove_device(&self, user_id: &str, token: &str) -> Result<bool, RegistryError> {
        let removed = self.store.delete_device(user_id, token).await?;
        if removed {
            info!(user_id = %user_id, token = %token_prefix(token), "Device removed");
            self.refresh_summary(user_id, None).await;
        } else {
            debug!(user_id = %user_id, token = %token_prefix(token), "Device already absent");
        }
        Ok(removed)
    }

    /// Read the profile's push summary mirror.
    pub async fn push_summary(&self, user_id: &str) -> Result<PushSummary, RegistryError> {
        Ok(self.store.read_push_summary(user_id).await?)
    }

    /// Drop the profile's current token.
    pub async fn clear_current_token(&self, user_id: &str) -> Result<(), RegistryError> {
        let mut summary = self.store.read_push_summary(user_id).await?;
        summary.fcm_token = None;
        self.store.write_push_summary(user_id, &summary).await?;
        Ok(())
    }

    async fn patch(
        &self,
        user_id: &str,
        token: &str,
        patch: &DevicePatch,
    ) -> Result<DeviceRecord, RegistryError> {
        let Some(record) = self.store.update_device(user_id, token, patch).await? else {
            warn!(user_id = %user_id, token = %token_prefix(token), "Update of missing device ignored");
            return Err(RegistryError::NotFound);
        };
        self.refresh_summary(user_id, None).await;
        Ok(record)
    }

    /// Recompute `notificationsEnabled` and keep `fcmToken` pointing at a
    /// live record. `current` replaces the token when given.
    async fn refresh_summary(&self, user_id: &str, current: Option<&str>) {
        let result: Result<PushSummary, StoreError> = async {
            let devices = self
                .store
                .query_devices(user_id, DeviceOrder::Unordered)
                .await?;
            let mut summary = self.store.read_push_summary(user_id).await?;

            summary.notifications_enabled = devices.iter().any(|d| d.enabled);
            match current {
                Some(token) => summary.fcm_token = Some(token.to_string()),
                None => {
                    let live = summary
                        .fcm_token
                        .as_deref()
                        .is_some_and(|t| devices.iter().any(|d| d.token == t));
                    if !live {
                        summary.fcm_token = None;
                    }
                }
            }

            self.store.write_push_summary(user_id, &summary).await?;
            Ok(summary)
        }
        .await;

        match result {
            Ok(summary) => debug!(
                user_id = %user_id,
                notifications_enabled = summary.notifications_enabled,
                "Push summary refreshed"
            ),
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to refresh push summary"),
        }
    }
}

fn validation_message(err: &validator::ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceEnvironment;
    use crate::services::clock::ManualClock;
    use crate::services::profile_store::MemoryProfileStore;
    use chrono::{Duration, TimeZone, Utc};

    fn env() -> DeviceEnvironment {
        DeviceEnvironment {
            user_agent: Some("X".to_string()),
            platform: Some("web".to_string()),
        }
    }

    fn setup(store: MemoryProfileStore) -> (DeviceRegistryClient, Arc<MemoryProfileStore>, ManualClock) {
        let store = Arc::new(store);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap());
        let registry = DeviceRegistryClient::new(store.clone(), Arc::new(clock.clone()));
        (registry, store, clock)
    }

    #[tokio::test]
    async fn test_upsert_creates_and_sets_summary() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        let record = registry
            .upsert_device("u1", "tok-a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        assert!(record.enabled);

        let summary = registry.push_summary("u1").await.unwrap();
        assert!(summary.notifications_enabled);
        assert_eq!(summary.fcm_token.as_deref(), Some("tok-a"));
    }

    #[tokio::test]
    async fn test_upsert_preserves_created_at() {
        let (registry, _, clock) = setup(MemoryProfileStore::new());
        let first = registry
            .upsert_device("u1", "tok-a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let second = registry
            .upsert_device("u1", "tok-a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.last_seen_at, first.created_at + Duration::hours(1));
        assert_eq!(registry.list_devices("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_blank_token() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        let err = registry
            .upsert_device("u1", "", DeviceFields::from_environment(&env()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_last_seen() {
        let (registry, _, clock) = setup(MemoryProfileStore::new());
        for token in ["a", "b", "c"] {
            registry
                .upsert_device("u1", token, DeviceFields::from_environment(&env()))
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }
        let tokens: Vec<_> = registry
            .list_devices("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.token)
            .collect();
        assert_eq!(tokens, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_list_falls_back_without_index() {
        let (registry, _, _) = setup(MemoryProfileStore::without_last_seen_index());
        registry
            .upsert_device("u1", "a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        registry
            .upsert_device("u1", "b", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        assert_eq!(registry.list_devices("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_enabled_updates_summary() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        registry
            .upsert_device("u1", "a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        let record = registry.set_enabled("u1", "a", false).await.unwrap();
        assert!(!record.enabled);
        assert!(!registry.push_summary("u1").await.unwrap().notifications_enabled);
    }

    #[tokio::test]
    async fn test_partial_updates_on_missing_record_are_not_found() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        assert!(matches!(
            registry.set_enabled("u1", "gone", true).await,
            Err(RegistryError::NotFound)
        ));
        assert!(matches!(
            registry.rename("u1", "gone", "Laptop").await,
            Err(RegistryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_rename_trims_and_validates() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        registry
            .upsert_device("u1", "a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        let record = registry.rename("u1", "a", "  Work laptop ").await.unwrap();
        assert_eq!(record.name.as_deref(), Some("Work laptop"));
        assert!(matches!(
            registry.rename("u1", "a", "   ").await,
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_device_is_idempotent() {
        let (registry, _, _) = setup(MemoryProfileStore::new());
        registry
            .upsert_device("u1", "a", DeviceFields::from_environment(&env()))
            .await
            .unwrap();
        assert!(registry.remove_device("u1", "a").await.unwrap());
        assert!(!registry.remove_device("u1", "a").await.unwrap());

        let summary = registry.push_summary("u1").await.unwrap();
        assert!(!summary.notifications_enabled);
        assert!(summary.fcm_token.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_recoverable_error() {
        let (registry, store, _) = setup(MemoryProfileStore::new());
        store.set_unavailable(true);
        let err = registry.list_devices("u1").await.unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
        assert!(err.is_retryable());
        assert!(err.user_message().contains("try again"));
    }
}
