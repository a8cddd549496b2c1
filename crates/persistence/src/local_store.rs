//! File-backed local store.
//!
//! Each key is one JSON document `<dir>/<key>.json`. Every write goes to its
//! own temporary file and is renamed into place, so neither a crash nor a
//! concurrent writer leaves a truncated document behind. The last rename wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::services::{LocalStore, LocalStoreError};
use tokio::fs;
use uuid::Uuid;

/// Local store writing one file per document.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
    max_document_bytes: Option<usize>,
}

impl FileLocalStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(
        dir: impl Into<PathBuf>,
        max_document_bytes: Option<usize>,
    ) -> Result<Self, LocalStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| LocalStoreError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        tracing::debug!(dir = %dir.display(), "Local store opened");
        Ok(Self {
            dir,
            max_document_bytes,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(LocalStoreError::Io(format!("invalid key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn read(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LocalStoreError::Io(e.to_string())),
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        if let Some(limit) = self.max_document_bytes {
            if value.len() > limit {
                return Err(LocalStoreError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    limit,
                });
            }
        }

        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!("{}.{}.tmp", key, Uuid::new_v4().simple()));
        let written = match fs::write(&tmp, value).await {
            Ok(()) => fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(LocalStoreError::Io(e.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LocalStoreError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use domain::models::{DeliverySource, NotificationRecord};
    use domain::services::{NotificationHistory, HISTORY_KEY};

    #[tokio::test]
    async fn test_missing_document_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), None).await.unwrap();
        assert!(store.read(HISTORY_KEY).await.unwrap().is_none());
        store.remove(HISTORY_KEY).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path().join("nested"), None)
            .await
            .unwrap();
        store.write("notification_dedup", "{}").await.unwrap();
        store.write("notification_dedup", "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.read("notification_dedup").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(std::fs::read_dir(dir.path().join("nested")).unwrap().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_leave_one_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), None).await.unwrap();

        let values: Vec<String> = (0..16)
            .map(|i| format!("{{\"writer\":{},\"pad\":\"{}\"}}", i, "x".repeat(4096)))
            .collect();
        let handles: Vec<_> = values
            .iter()
            .cloned()
            .map(|value| {
                let store = store.clone();
                tokio::spawn(async move { store.write("notification_dedup", &value).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.read("notification_dedup").await.unwrap().unwrap();
        assert!(values.contains(&stored));
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_quota_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), Some(8)).await.unwrap();
        assert!(matches!(
            store.write("k", "0123456789").await,
            Err(LocalStoreError::QuotaExceeded { limit: 8, .. })
        ));
        assert!(store.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), None).await.unwrap();
        assert!(store.write("../escape", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileLocalStore::open(dir.path(), None).await.unwrap());

        let history = NotificationHistory::open(store.clone(), 100).await;
        let record = NotificationRecord {
            id: "general-none-Hello-World".to_string(),
            title: "Hello".to_string(),
            body: "World".to_string(),
            kind: "general".to_string(),
            event_id: None,
            url: "/".to_string(),
            timestamp: chrono::Utc::now(),
            read: false,
            source: DeliverySource::Background,
        };
        history.append(record.clone()).await;
        drop(history);

        let reopened = NotificationHistory::open(store, 100).await;
        assert_eq!(reopened.list_all(), vec![record]);
    }
}
