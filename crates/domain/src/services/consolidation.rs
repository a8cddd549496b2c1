//! Duplicate-device consolidation.
//!
//! Repeated token acquisition leaves several live tokens for one physical
//! device. Records are grouped by `(userAgent, platform)`; within a group the
//! most recently seen record survives and the rest are deleted.
//!
//! The grouping key is a heuristic. Two distinct devices with identical
//! browser and OS strings are merged.

use std::collections::HashMap;

use serde::Serialize;
use shared::validation::token_prefix;
use tracing::{info, warn};

use crate::models::DeviceRecord;
use crate::services::registry::{DeviceRegistryClient, RegistryError};

/// Outcome of a consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    /// Duplicates actually deleted.
    pub removed: usize,
    /// Duplicates whose deletion failed.
    pub failed: usize,
}

impl ConsolidationReport {
    /// Short status line for the settings surface.
    pub fn message(&self) -> String {
        match (self.removed, self.failed) {
            (0, 0) => "No duplicate devices found".to_string(),
            (1, 0) => "1 duplicate device removed".to_string(),
            (n, 0) => format!("{} duplicate devices removed", n),
            (n, f) => format!("{} duplicate devices removed, {} could not be removed", n, f),
        }
    }
}

/// Removes duplicate records of one physical device.
#[derive(Clone)]
pub struct DeviceConsolidator {
    registry: DeviceRegistryClient,
}

impl DeviceConsolidator {
    pub fn new(registry: DeviceRegistryClient) -> Self {
        Self { registry }
    }

    /// Run one pass for a user.
    ///
    /// Only listing can fail the pass. Individual deletion failures are
    /// logged, skipped and counted separately.
    pub async fn consolidate(&self, user_id: &str) -> Result<ConsolidationReport, RegistryError> {
        let devices = self.registry.list_devices(user_id).await?;
        let mut report = ConsolidationReport {
            removed: 0,
            failed: 0,
        };

        for duplicate in duplicates(devices) {
            match self.registry.remove_device(user_id, &duplicate.token).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        token = %token_prefix(&duplicate.token),
                        error = %e,
                        "Failed to remove duplicate device, skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(
                user_id = %user_id,
                removed = report.removed,
                failed = report.failed,
                "Device consolidation finished"
            );
        }
        Ok(report)
    }
}

/// Every record that is not the most recently seen of its fingerprint group.
fn duplicates(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut groups: HashMap<String, Vec<DeviceRecord>> = HashMap::new();
    for device in devices {
        groups.entry(device.fingerprint()).or_default().push(device);
    }

    groups
        .into_values()
        .filter(|group| group.len() > 1)
        .flat_map(|mut group| {
            group.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
            group.into_iter().skip(1)
        })
        .collect()
}
