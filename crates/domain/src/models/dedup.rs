//! Delivery deduplication models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::DeliverySource;

/// A fingerprint currently inside the dedup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    /// Time of first acceptance, stored as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub source: DeliverySource,
}

impl DedupEntry {
    /// True once the entry is older than the window.
    pub fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.timestamp > window
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupDecision {
    /// First sighting inside the window; the caller must record it.
    New,
    /// Already accepted inside the window; the caller must drop it.
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_entry_serializes_millis() {
        let entry = DedupEntry {
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            source: DeliverySource::Background,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"timestamp":1700000000123,"source":"background"}"#);
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = Utc.timestamp_millis_opt(0).unwrap();
        let entry = DedupEntry {
            timestamp: t0,
            source: DeliverySource::Foreground,
        };
        let window = Duration::seconds(10);
        assert!(!entry.is_expired(t0 + Duration::seconds(10), window));
        assert!(entry.is_expired(t0 + Duration::milliseconds(10_001), window));
    }
}
