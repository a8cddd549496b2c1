//! Remote profile store abstraction.
//!
//! The hosted document store keeps, per user, a sub-mapping of device
//! records keyed by token plus two scalar fields on the profile document.
//! Ordering by `lastSeenAt` needs an index the store may not have; in that
//! case ordered queries fail with [`StoreError::IndexUnavailable`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::{DevicePatch, DeviceRecord, PushSummary};

/// Requested ordering of a device query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrder {
    LastSeenDesc,
    Unordered,
}

/// Error type for profile store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Ordering index is not available")]
    IndexUnavailable,

    #[error("Profile store unreachable: {0}")]
    Unavailable(String),

    #[error("Profile store error: {0}")]
    Backend(String),
}

/// Document-store operations the device registry needs.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    async fn query_devices(
        &self,
        user_id: &str,
        order: DeviceOrder,
    ) -> Result<Vec<DeviceRecord>, StoreError>;

    async fn get_device(&self, user_id: &str, token: &str)
        -> Result<Option<DeviceRecord>, StoreError>;

    /// Create or overwrite the record keyed by `record.token`.
    async fn put_device(&self, user_id: &str, record: &DeviceRecord) -> Result<(), StoreError>;

    /// Patch an existing record. `None` if it does not exist.
    async fn update_device(
        &self,
        user_id: &str,
        token: &str,
        patch: &DevicePatch,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Delete a record. Returns whether something was deleted.
    async fn delete_device(&self, user_id: &str, token: &str) -> Result<bool, StoreError>;

    async fn read_push_summary(&self, user_id: &str) -> Result<PushSummary, StoreError>;

    async fn write_push_summary(
        &self,
        user_id: &str,
        summary: &PushSummary,
    ) -> Result<(), StoreError>;
}

/// In-memory profile store for development and testing.
///
/// Devices are kept in insertion order so that unordered scans are
/// distinguishable from ordered ones.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    devices: Mutex<HashMap<String, Vec<DeviceRecord>>>,
    summaries: Mutex<HashMap<String, PushSummary>>,
    without_index: AtomicBool,
    unavailable: AtomicBool,
    failing_deletes: Mutex<HashSet<String>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that cannot serve ordered queries.
    pub fn without_last_seen_index() -> Self {
        let store = Self::default();
        store.without_index.store(true, Ordering::SeqCst);
        store
    }

    /// Simulate the store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make deletes of one token fail.
    pub fn fail_deletes_for(&self, token: &str) {
        self.failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(token.to_string());
    }

    /// Seed records without going through the registry.
    pub fn seed(&self, user_id: &str, records: Vec<DeviceRecord>) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id.to_string())
            .or_default()
            .extend(records);
    }

    /// Snapshot of a user's records in storage order.
    pub fn snapshot(&self, user_id: &str) -> Vec<DeviceRecord> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn query_devices(
        &self,
        user_id: &str,
        order: DeviceOrder,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        self.check_available()?;
        let mut records = self.snapshot(user_id);
        if order == DeviceOrder::LastSeenDesc {
            if self.without_index.load(Ordering::SeqCst) {
                return Err(StoreError::IndexUnavailable);
            }
            records.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        }
        Ok(records)
    }

    async fn get_device(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        self.check_available()?;
        Ok(self.snapshot(user_id).into_iter().find(|r| r.token == token))
    }

    async fn put_device(&self, user_id: &str, record: &DeviceRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let records = devices.entry(user_id.to_string()).or_default();
        match records.iter_mut().find(|r| r.token == record.token) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn update_device(
        &self,
        user_id: &str,
        token: &str,
        patch: &DevicePatch,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        self.check_available()?;
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let updated = devices
            .get_mut(user_id)
            .and_then(|records| records.iter_mut().find(|r| r.token == token))
            .map(|record| {
                patch.apply(record);
                record.clone()
            });
        Ok(updated)
    }

    async fn delete_device(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        if self
            .failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(token)
        {
            return Err(StoreError::Backend(format!(
                "simulated delete failure for {}",
                token
            )));
        }
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let Some(records) = devices.get_mut(user_id) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.token != token);
        Ok(records.len() != before)
    }

    async fn read_push_summary(&self, user_id: &str) -> Result<PushSummary, StoreError> {
        self.check_available()?;
        Ok(self
            .summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_push_summary(
        &self,
        user_id: &str,
        summary: &PushSummary,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn device(token: &str, minutes: i64) -> DeviceRecord {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes);
        DeviceRecord {
            token: token.to_string(),
            name: None,
            platform: Some("web".to_string()),
            user_agent: Some("X".to_string()),
            enabled: true,
            created_at: at,
            last_seen_at: at,
        }
    }

    #[tokio::test]
    async fn test_ordered_query_sorts_by_last_seen() {
        let store = MemoryProfileStore::new();
        store.seed("u", vec![device("a", 0), device("b", 5), device("c", -10)]);
        let tokens: Vec<_> = store
            .query_devices("u", DeviceOrder::LastSeenDesc)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token)
            .collect();
        assert_eq!(tokens, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_missing_index_rejects_ordered_query_only() {
        let store = MemoryProfileStore::without_last_seen_index();
        store.seed("u", vec![device("a", 0)]);
        assert!(matches!(
            store.query_devices("u", DeviceOrder::LastSeenDesc).await,
            Err(StoreError::IndexUnavailable)
        ));
        assert_eq!(
            store
                .query_devices("u", DeviceOrder::Unordered)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_missing_device_returns_none() {
        let store = MemoryProfileStore::new();
        let patch = DevicePatch {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(store.update_device("u", "nope", &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryProfileStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_device("u", "a").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
