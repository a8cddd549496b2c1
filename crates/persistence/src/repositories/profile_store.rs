//! PostgreSQL-backed profile store.
//!
//! Devices live in `push_devices`, keyed by `(user_id, token)`; the push
//! summary lives in `push_profiles`. The `last_seen_at` index always exists
//! here, so ordered queries never report a missing index.

use async_trait::async_trait;
use domain::models::{DevicePatch, DeviceRecord, PushSummary};
use domain::services::{DeviceOrder, ProfileStore, StoreError};
use sqlx::PgPool;

use super::{PushDeviceRepository, PushProfileRepository};

/// Profile store over the application database.
#[derive(Clone)]
pub struct PgProfileStore {
    devices: PushDeviceRepository,
    profiles: PushProfileRepository,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            devices: PushDeviceRepository::new(pool.clone()),
            profiles: PushProfileRepository::new(pool),
        }
    }
}

/// Connectivity problems are recoverable outages; everything else is a
/// backend error.
fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => {
            tracing::error!(error = %other, "Profile store query failed");
            StoreError::Backend(other.to_string())
        }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn query_devices(
        &self,
        user_id: &str,
        order: DeviceOrder,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        let rows = match order {
            DeviceOrder::LastSeenDesc => self.devices.list_by_last_seen(user_id).await,
            DeviceOrder::Unordered => self.devices.list(user_id).await,
        }
        .map_err(store_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_device(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let row = self.devices.find(user_id, token).await.map_err(store_error)?;
        Ok(row.map(Into::into))
    }

    async fn put_device(&self, user_id: &str, record: &DeviceRecord) -> Result<(), StoreError> {
        self.devices
            .upsert(
                user_id,
                &record.token,
                record.name.as_deref(),
                record.platform.as_deref(),
                record.user_agent.as_deref(),
                record.enabled,
                record.created_at,
                record.last_seen_at,
            )
            .await
            .map_err(store_error)
    }

    async fn update_device(
        &self,
        user_id: &str,
        token: &str,
        patch: &DevicePatch,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let row = self
            .devices
            .update(
                user_id,
                token,
                patch.name.as_deref(),
                patch.enabled,
                patch.last_seen_at,
            )
            .await
            .map_err(store_error)?;
        Ok(row.map(Into::into))
    }

    async fn delete_device(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        let removed = self
            .devices
            .delete(user_id, token)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn read_push_summary(&self, user_id: &str) -> Result<PushSummary, StoreError> {
        let row = self.profiles.find(user_id).await.map_err(store_error)?;
        Ok(row.map(Into::into).unwrap_or_default())
    }

    async fn write_push_summary(
        &self,
        user_id: &str,
        summary: &PushSummary,
    ) -> Result<(), StoreError> {
        self.profiles
            .upsert(
                user_id,
                summary.notifications_enabled,
                summary.fcm_token.as_deref(),
            )
            .await
            .map_err(store_error)
    }
}
