//! Delivery pipeline.
//!
//! Every delivery path (foreground listener, background worker, on-open
//! check) funnels through [`DeliveryPipeline::receive`], which runs the
//! dedup check and, for new notifications, appends to the history.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{DedupDecision, DeliverySource, IncomingNotification, NotificationRecord};
use crate::services::clock::Clock;
use crate::services::dedup::DeliveryDeduplicator;
use crate::services::history::NotificationHistory;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// New notification, now in the history.
    Accepted { record: NotificationRecord },
    /// Seen within the dedup window, dropped.
    Duplicate { fingerprint: String },
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted { .. })
    }
}

/// Dedup engine and history store wired together.
#[derive(Clone)]
pub struct DeliveryPipeline {
    dedup: DeliveryDeduplicator,
    history: Arc<NotificationHistory>,
    clock: Arc<dyn Clock>,
}

impl DeliveryPipeline {
    pub fn new(
        dedup: DeliveryDeduplicator,
        history: Arc<NotificationHistory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dedup,
            history,
            clock,
        }
    }

    pub fn history(&self) -> &Arc<NotificationHistory> {
        &self.history
    }

    pub fn dedup(&self) -> &DeliveryDeduplicator {
        &self.dedup
    }

    /// Handle one delivery from any path.
    pub async fn receive(
        &self,
        incoming: IncomingNotification,
        source: DeliverySource,
    ) -> DeliveryOutcome {
        let fingerprint = incoming.fingerprint();
        match self.dedup.check(&fingerprint, source).await {
            DedupDecision::Duplicate => DeliveryOutcome::Duplicate { fingerprint },
            DedupDecision::New => {
                let record =
                    NotificationRecord::accepted(incoming, fingerprint, source, self.clock.now());
                self.history.append(record.clone()).await;
                info!(
                    id = %record.id,
                    kind = %record.kind,
                    source = %source,
                    "Notification accepted"
                );
                DeliveryOutcome::Accepted { record }
            }
        }
    }

    /// Run a batch of pending notifications found when the console opens.
    pub async fn reconcile_on_open(&self, pending: Vec<IncomingNotification>) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(pending.len());
        for incoming in pending {
            outcomes.push(self.receive(incoming, DeliverySource::OnOpen).await);
        }
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        debug!(
            total = outcomes.len(),
            accepted,
            "On-open reconciliation finished"
        );
        outcomes
    }

    /// Consume a channel of incoming notifications until it closes.
    pub fn listen(
        &self,
        mut rx: broadcast::Receiver<IncomingNotification>,
        source: DeliverySource,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            info!(source = %source, "Delivery listener started");
            loop {
                match rx.recv().await {
                    Ok(incoming) => {
                        pipeline.receive(incoming, source).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(source = %source, skipped, "Delivery listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!(source = %source, "Delivery listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::local_store::MemoryLocalStore;
    use chrono::{Duration, TimeZone, Utc};

    async fn pipeline() -> (DeliveryPipeline, ManualClock) {
        let store = Arc::new(MemoryLocalStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let dedup = DeliveryDeduplicator::new(store.clone(), shared_clock.clone());
        let history = Arc::new(NotificationHistory::open(store, 100).await);
        (DeliveryPipeline::new(dedup, history, shared_clock), clock)
    }

    fn reminder() -> IncomingNotification {
        IncomingNotification::new("event_reminder", "Reminder", "...").with_event_id("E1")
    }

    #[tokio::test]
    async fn test_duplicate_across_paths_is_dropped() {
        let (pipeline, clock) = pipeline().await;
        let first = pipeline.receive(reminder(), DeliverySource::Background).await;
        clock.advance(Duration::seconds(2));
        let second = pipeline.receive(reminder(), DeliverySource::Foreground).await;

        assert!(first.is_accepted());
        assert!(matches!(second, DeliveryOutcome::Duplicate { .. }));
        assert_eq!(pipeline.history().list_all().len(), 1);
        assert_eq!(
            pipeline.history().list_all()[0].source,
            DeliverySource::Background
        );
    }

    #[tokio::test]
    async fn test_redelivery_after_window_is_recorded_twice() {
        let (pipeline, clock) = pipeline().await;
        pipeline.receive(reminder(), DeliverySource::Background).await;
        clock.advance(Duration::seconds(15));
        let second = pipeline.receive(reminder(), DeliverySource::Foreground).await;

        assert!(second.is_accepted());
        let history = pipeline.history().list_all();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, DeliverySource::Foreground);
        assert_eq!(pipeline.history().unread_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_on_open_uses_on_open_source() {
        let (pipeline, _) = pipeline().await;
        pipeline.receive(reminder(), DeliverySource::Background).await;

        let outcomes = pipeline
            .reconcile_on_open(vec![
                reminder(),
                IncomingNotification::new("task_assigned", "New task", "Review SOP"),
            ])
            .await;

        assert!(!outcomes[0].is_accepted());
        match &outcomes[1] {
            DeliveryOutcome::Accepted { record } => {
                assert_eq!(record.source, DeliverySource::OnOpen);
                assert_eq!(record.url, "/");
            }
            other => panic!("expected accepted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_feeds_history_until_closed() {
        let (pipeline, _) = pipeline().await;
        let (tx, rx) = broadcast::channel(8);
        let handle = pipeline.listen(rx, DeliverySource::Foreground);

        tx.send(reminder()).unwrap();
        tx.send(reminder()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(pipeline.history().list_all().len(), 1);
    }
}
