//! Local persistent key-value area.
//!
//! Both the dedup map and the notification history live here as whole JSON
//! documents. Callers read, mutate and write back a full document; there are
//! no field-level updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Key of the notification history document.
pub const HISTORY_KEY: &str = "notification_history";

/// Key of the dedup map document.
pub const DEDUP_KEY: &str = "notification_dedup";

/// Error type for local storage operations.
#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("Local storage is unavailable: {0}")]
    Unavailable(String),

    #[error("Local storage quota exceeded for {key}: {size} bytes, limit {limit}")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Local storage I/O error: {0}")]
    Io(String),
}

/// Whole-document key-value storage owned by the local client.
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    /// Read a document, `None` if it was never written.
    async fn read(&self, key: &str) -> Result<Option<String>, LocalStoreError>;

    /// Replace a document.
    async fn write(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// In-memory local store for development and testing.
///
/// Supports failure injection and a per-document size quota.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    docs: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    quota: Option<usize>,
}

impl MemoryLocalStore {
    /// Create an empty store without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects documents larger than `limit` bytes.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            quota: Some(limit),
            ..Self::default()
        }
    }

    /// Make every read fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Peek at a stored document, bypassing failure injection.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Store a document, bypassing failure injection and quota.
    pub fn put_raw(&self, key: &str, value: impl Into<String>) {
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.into());
    }
}

#[async_trait::async_trait]
impl LocalStore for MemoryLocalStore {
    async fn read(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Unavailable(
                "simulated read failure".to_string(),
            ));
        }
        Ok(self.raw(key))
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }
        if let Some(limit) = self.quota {
            if value.len() > limit {
                return Err(LocalStoreError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    limit,
                });
            }
        }
        self.put_raw(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LocalStoreError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }
        self.docs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryLocalStore::new();
        assert!(store.read("k").await.unwrap().is_none());
        store.write("k", "[1,2]").await.unwrap();
        assert_eq!(store.read("k").await.unwrap().as_deref(), Some("[1,2]"));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryLocalStore::new();
        store.set_fail_reads(true);
        assert!(matches!(
            store.read("k").await,
            Err(LocalStoreError::Unavailable(_))
        ));
        store.set_fail_writes(true);
        assert!(store.write("k", "v").await.is_err());
        assert!(store.raw("k").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_quota() {
        let store = MemoryLocalStore::with_quota(4);
        store.write("k", "1234").await.unwrap();
        let err = store.write("k", "12345").await.unwrap_err();
        assert!(matches!(
            err,
            LocalStoreError::QuotaExceeded { size: 5, limit: 4, .. }
        ));
        assert_eq!(store.raw("k").as_deref(), Some("1234"));
    }
}
