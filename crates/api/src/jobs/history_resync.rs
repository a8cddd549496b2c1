//! Periodic reload of the local notification history.
//!
//! Other contexts sharing the local store (another console window, the
//! background worker) write the history document directly. Change events
//! cover this process; this job picks up everything else.

use std::sync::Arc;

use domain::services::NotificationHistory;

use super::scheduler::{Job, JobFrequency};

pub struct HistoryResyncJob {
    history: Arc<NotificationHistory>,
    period_secs: u64,
}

impl HistoryResyncJob {
    pub fn new(history: Arc<NotificationHistory>, period_secs: u64) -> Self {
        Self {
            history,
            period_secs: period_secs.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Job for HistoryResyncJob {
    fn name(&self) -> &'static str {
        "history_resync"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.period_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        self.history.reload().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::services::{LocalStore, MemoryLocalStore, HISTORY_KEY};

    #[tokio::test]
    async fn test_execute_picks_up_external_writes() {
        let store = Arc::new(MemoryLocalStore::new());
        let history = Arc::new(NotificationHistory::open(store.clone(), 100).await);
        assert!(history.list_all().is_empty());

        let written = serde_json::json!([{
            "id": "general-none-Hello-World",
            "title": "Hello",
            "body": "World",
            "type": "general",
            "eventId": null,
            "url": "/",
            "timestamp": "2026-05-01T09:00:00Z",
            "read": false,
            "source": "background"
        }]);
        store
            .write(HISTORY_KEY, &written.to_string())
            .await
            .unwrap();

        let job = HistoryResyncJob::new(history.clone(), 30);
        job.execute().await.unwrap();

        assert_eq!(history.list_all().len(), 1);
        assert_eq!(history.unread_count(), 1);
        assert_eq!(job.frequency(), JobFrequency::Seconds(30));
    }
}
