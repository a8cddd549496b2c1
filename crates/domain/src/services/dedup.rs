//! Delivery deduplication engine.
//!
//! The same logical notification can reach the client through the foreground
//! listener, the background worker and the on-open check. This engine accepts
//! at most one delivery per fingerprint per window, whatever the path.
//!
//! Every storage failure fails open: the notification is treated as new.
//! Checks through one deduplicator (and its clones) are serialized, so two
//! paths racing on a fingerprint accept it once. Separate processes sharing
//! the store may still both accept; that rare double delivery is accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::{DedupDecision, DedupEntry, DeliverySource};
use crate::services::clock::Clock;
use crate::services::local_store::{LocalStore, DEDUP_KEY};

/// Default dedup window in seconds.
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 10;

type DedupMap = BTreeMap<String, DedupEntry>;

/// Fingerprint-based duplicate suppression backed by the local store.
#[derive(Clone)]
pub struct DeliveryDeduplicator {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    check_lock: Arc<Mutex<()>>,
}

impl DeliveryDeduplicator {
    /// Create a deduplicator with the default 10 second window.
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
            check_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Override the dedup window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a delivery is new or a duplicate.
    ///
    /// Purge, check and insert form one unit of work on the stored map.
    pub async fn check(&self, fingerprint: &str, source: DeliverySource) -> DedupDecision {
        let _guard = self.check_lock.lock().await;
        let now = self.clock.now();
        let mut entries = self.load().await;

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.window));
        let purged = before - entries.len();

        if let Some(previous) = entries.get(fingerprint) {
            debug!(
                fingerprint = %fingerprint,
                source = %source,
                first_source = %previous.source,
                elapsed_ms = (now - previous.timestamp).num_milliseconds(),
                "Duplicate delivery suppressed"
            );
            if purged > 0 {
                self.save(&entries).await;
            }
            return DedupDecision::Duplicate;
        }

        entries.insert(
            fingerprint.to_string(),
            DedupEntry {
                timestamp: now,
                source,
            },
        );
        self.save(&entries).await;

        debug!(
            fingerprint = %fingerprint,
            source = %source,
            tracked = entries.len(),
            "Delivery accepted"
        );
        DedupDecision::New
    }

    /// Forget every tracked fingerprint.
    pub async fn clear(&self) {
        let _guard = self.check_lock.lock().await;
        if let Err(e) = self.store.remove(DEDUP_KEY).await {
            warn!(error = %e, "Failed to clear dedup state");
        }
    }

    /// Load the map, dropping malformed entries. Any failure yields an empty map.
    async fn load(&self) -> DedupMap {
        let raw = match self.store.read(DEDUP_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return DedupMap::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read dedup state, treating as empty");
                return DedupMap::new();
            }
        };

        let object: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(object) => object,
            Err(e) => {
                warn!(error = %e, "Dedup state is corrupt, treating as empty");
                return DedupMap::new();
            }
        };

        object
            .into_iter()
            .filter_map(|(fingerprint, value)| {
                match serde_json::from_value::<DedupEntry>(value) {
                    Ok(entry) => Some((fingerprint, entry)),
                    Err(e) => {
                        warn!(fingerprint = %fingerprint, error = %e, "Dropping malformed dedup entry");
                        None
                    }
                }
            })
            .collect()
    }

    async fn save(&self, entries: &DedupMap) {
        let raw = match serde_json::to_string(entries) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to serialize dedup state");
                return;
            }
        };
        if let Err(e) = self.store.write(DEDUP_KEY, &raw).await {
            warn!(error = %e, "Failed to persist dedup state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncomingNotification;
    use crate::services::clock::ManualClock;
    use crate::services::local_store::MemoryLocalStore;
    use chrono::{TimeZone, Utc};

    fn setup() -> (DeliveryDeduplicator, Arc<MemoryLocalStore>, ManualClock) {
        let store = Arc::new(MemoryLocalStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap());
        let dedup = DeliveryDeduplicator::new(store.clone(), Arc::new(clock.clone()));
        (dedup, store, clock)
    }

    fn reminder() -> String {
        IncomingNotification::new("event_reminder", "Reminder", "...")
            .with_event_id("E1")
            .fingerprint()
    }

    #[tokio::test]
    async fn test_second_delivery_within_window_is_duplicate_across_sources() {
        let (dedup, _, clock) = setup();
        let fp = reminder();

        assert_eq!(
            dedup.check(&fp, DeliverySource::Background).await,
            DedupDecision::New
        );
        clock.advance(Duration::seconds(2));
        assert_eq!(
            dedup.check(&fp, DeliverySource::Foreground).await,
            DedupDecision::Duplicate
        );
    }

    #[tokio::test]
    async fn test_delivery_after_window_is_new_again() {
        let (dedup, _, clock) = setup();
        let fp = reminder();

        assert_eq!(
            dedup.check(&fp, DeliverySource::Background).await,
            DedupDecision::New
        );
        clock.advance(Duration::seconds(15));
        assert_eq!(
            dedup.check(&fp, DeliverySource::Foreground).await,
            DedupDecision::New
        );
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_are_independent() {
        let (dedup, _, _) = setup();
        assert_eq!(
            dedup.check("a", DeliverySource::Foreground).await,
            DedupDecision::New
        );
        assert_eq!(
            dedup.check("b", DeliverySource::Foreground).await,
            DedupDecision::New
        );
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged_from_storage() {
        let (dedup, store, clock) = setup();
        dedup.check("old", DeliverySource::Foreground).await;
        clock.advance(Duration::seconds(11));
        dedup.check("fresh", DeliverySource::Foreground).await;

        let raw = store.raw(DEDUP_KEY).unwrap();
        assert!(!raw.contains("\"old\""));
        assert!(raw.contains("\"fresh\""));
    }

    #[tokio::test]
    async fn test_read_failure_fails_open() {
        let (dedup, store, _) = setup();
        dedup.check("fp", DeliverySource::Foreground).await;
        store.set_fail_reads(true);
        assert_eq!(
            dedup.check("fp", DeliverySource::Background).await,
            DedupDecision::New
        );
    }

    #[tokio::test]
    async fn test_write_failure_fails_open() {
        let (dedup, store, _) = setup();
        store.set_fail_writes(true);
        assert_eq!(
            dedup.check("fp", DeliverySource::Foreground).await,
            DedupDecision::New
        );
        // Nothing was recorded, so the next delivery is not suppressed either.
        assert_eq!(
            dedup.check("fp", DeliverySource::Background).await,
            DedupDecision::New
        );
    }

    #[tokio::test]
    async fn test_corrupt_document_is_treated_as_empty() {
        let (dedup, store, _) = setup();
        store.put_raw(DEDUP_KEY, "{not json");
        assert_eq!(
            dedup.check("fp", DeliverySource::Foreground).await,
            DedupDecision::New
        );
        assert!(store.raw(DEDUP_KEY).unwrap().contains("\"fp\""));
    }

    #[tokio::test]
    async fn test_malformed_entries_are_dropped_individually() {
        let (dedup, store, clock) = setup();
        let ts = clock.now().timestamp_millis();
        store.put_raw(
            DEDUP_KEY,
            format!(
                r#"{{"good":{{"timestamp":{},"source":"background"}},"bad":{{"timestamp":"yesterday"}}}}"#,
                ts
            ),
        );
        assert_eq!(
            dedup.check("good", DeliverySource::Foreground).await,
            DedupDecision::Duplicate
        );
        assert_eq!(
            dedup.check("bad", DeliverySource::Foreground).await,
            DedupDecision::New
        );
    }

    #[tokio::test]
    async fn test_custom_window() {
        let (dedup, _, clock) = setup();
        let dedup = dedup.with_window(Duration::seconds(30));
        dedup.check("fp", DeliverySource::Foreground).await;
        clock.advance(Duration::seconds(20));
        assert_eq!(
            dedup.check("fp", DeliverySource::OnOpen).await,
            DedupDecision::Duplicate
        );
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let (dedup, _, _) = setup();
        dedup.check("fp", DeliverySource::Foreground).await;
        dedup.clear().await;
        assert_eq!(
            dedup.check("fp", DeliverySource::Foreground).await,
            DedupDecision::New
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_accept_once() {
        let (dedup, _, _) = setup();

        for i in 0..50 {
            let fp = format!("race-{}", i);
            let foreground = {
                let dedup = dedup.clone();
                let fp = fp.clone();
                tokio::spawn(async move { dedup.check(&fp, DeliverySource::Foreground).await })
            };
            let background = {
                let dedup = dedup.clone();
                let fp = fp.clone();
                tokio::spawn(async move { dedup.check(&fp, DeliverySource::Background).await })
            };
            let (a, b) = tokio::join!(foreground, background);
            let accepted = [a.unwrap(), b.unwrap()]
                .iter()
                .filter(|d| **d == DedupDecision::New)
                .count();
            assert_eq!(accepted, 1, "fingerprint {} accepted {} times", fp, accepted);
        }
    }
}
