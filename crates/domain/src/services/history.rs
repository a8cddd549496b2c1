//! Local notification history.
//!
//! A capped, newest-first list of accepted notifications with read state,
//! persisted as one document in the local store. Every mutation emits a
//! single [`HistoryChange`] so any number of observers (badge, panel) can
//! resynchronize.
//!
//! Writes fail soft: if the store refuses a write the in-memory copy stays
//! authoritative for this context and the failure is logged. Cross-context
//! consistency is best effort; each mutation re-reads the stored document
//! before applying itself.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::models::NotificationRecord;
use crate::services::local_store::{LocalStore, LocalStoreError, HISTORY_KEY};

/// Default maximum number of history entries.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Change notification emitted after every mutating history operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryChange {
    Appended { id: String },
    MarkedRead { id: String },
    MarkedAllRead { count: usize },
    Deleted { id: String },
    Cleared,
    /// Another context changed the stored document.
    Reloaded,
}

/// Capped notification history backed by the local store.
pub struct NotificationHistory {
    store: Arc<dyn LocalStore>,
    capacity: usize,
    cache: RwLock<Vec<NotificationRecord>>,
    events: broadcast::Sender<HistoryChange>,
    write_lock: Mutex<()>,
}

impl NotificationHistory {
    /// Open the history, loading whatever the store currently holds.
    pub async fn open(store: Arc<dyn LocalStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let initial = load_records(store.as_ref(), capacity).await.unwrap_or_default();
        debug!(entries = initial.len(), capacity, "Notification history loaded");

        Self {
            store,
            capacity,
            cache: RwLock::new(initial),
            events,
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to history changes.
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryChange> {
        self.events.subscribe()
    }

    /// All entries, newest first.
    pub fn list_all(&self) -> Vec<NotificationRecord> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn unread_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| !r.read)
            .count()
    }

    /// Insert at the head, evicting the oldest entries beyond capacity.
    pub async fn append(&self, record: NotificationRecord) {
        let id = record.id.clone();
        self.mutate(move |records| {
            records.insert(0, record);
            Some(HistoryChange::Appended { id })
        })
        .await;
    }

    /// Mark every entry carrying `id` as read. Returns false if none was unread.
    pub async fn mark_read(&self, id: &str) -> bool {
        self.mutate(|records| {
            let mut changed = false;
            for record in records.iter_mut().filter(|r| r.id == id && !r.read) {
                record.read = true;
                changed = true;
            }
            changed.then(|| HistoryChange::MarkedRead { id: id.to_string() })
        })
        .await
    }

    /// Mark everything read. Returns the number of entries that changed.
    pub async fn mark_all_read(&self) -> usize {
        let mut count = 0;
        self.mutate(|records| {
            for record in records.iter_mut().filter(|r| !r.read) {
                record.read = true;
                count += 1;
            }
            (count > 0).then_some(HistoryChange::MarkedAllRead { count })
        })
        .await;
        count
    }

    /// Remove every entry carrying `id`. Returns false if there was none.
    pub async fn delete(&self, id: &str) -> bool {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|r| r.id != id);
            (records.len() != before).then(|| HistoryChange::Deleted { id: id.to_string() })
        })
        .await
    }

    /// Remove all entries.
    pub async fn clear_all(&self) {
        self.mutate(|records| {
            records.clear();
            Some(HistoryChange::Cleared)
        })
        .await;
    }

    /// Resynchronize the in-memory copy with the store.
    ///
    /// Emits [`HistoryChange::Reloaded`] only if the stored document differed.
    pub async fn reload(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let Some(records) = load_records(self.store.as_ref(), self.capacity).await else {
            return false;
        };
        let changed = {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            let changed = *cache != records;
            *cache = records;
            changed
        };
        if changed {
            let _ = self.events.send(HistoryChange::Reloaded);
        }
        changed
    }

    /// Read current value, mutate, write back, emit.
    ///
    /// The closure returns the change to emit, or `None` when it changed
    /// nothing, in which case nothing is persisted or emitted.
    async fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<NotificationRecord>) -> Option<HistoryChange>,
    {
        let _guard = self.write_lock.lock().await;

        let mut records = match load_records(self.store.as_ref(), self.capacity).await {
            Some(records) => records,
            None => self.list_all(),
        };

        let Some(change) = f(&mut records) else {
            *self.cache.write().unwrap_or_else(|e| e.into_inner()) = records;
            return false;
        };

        records.truncate(self.capacity);
        self.persist(&mut records).await;
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = records;

        // No subscribers is fine.
        let _ = self.events.send(change);
        true
    }

    /// Write the records, halving the history once if the store is full.
    async fn persist(&self, records: &mut Vec<NotificationRecord>) {
        match write_records(self.store.as_ref(), records).await {
            Ok(()) => {}
            Err(LocalStoreError::QuotaExceeded { size, limit, .. }) => {
                let keep = records.len() / 2;
                warn!(
                    size,
                    limit,
                    entries = records.len(),
                    keep,
                    "History exceeds storage quota, dropping oldest entries"
                );
                let mut trimmed = records.clone();
                trimmed.truncate(keep);
                match write_records(self.store.as_ref(), &trimmed).await {
                    Ok(()) => *records = trimmed,
                    Err(e) => warn!(error = %e, "Failed to persist trimmed history"),
                }
            }
            Err(e) => warn!(error = %e, "Failed to persist notification history"),
        }
    }
}

/// Load and validate the stored history. `None` if the store could not be read.
async fn load_records(store: &dyn LocalStore, capacity: usize) -> Option<Vec<NotificationRecord>> {
    let raw = match store.read(HISTORY_KEY).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Some(Vec::new()),
        Err(e) => {
            warn!(error = %e, "Failed to read notification history");
            return None;
        }
    };

    let values: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "Notification history is corrupt, starting empty");
            return Some(Vec::new());
        }
    };

    let mut records: Vec<NotificationRecord> = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Dropping malformed history entry");
                None
            }
        })
        .collect();
    records.truncate(capacity);
    Some(records)
}

async fn write_records(
    store: &dyn LocalStore,
    records: &[NotificationRecord],
) -> Result<(), LocalStoreError> {
    let raw = serde_json::to_string(records)
        .map_err(|e| LocalStoreError::Io(format!("serialize history: {}", e)))?;
    store.write(HISTORY_KEY, &raw).await
}
