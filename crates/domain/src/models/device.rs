//! Device registry models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::device_label::derive_device_label;
use shared::fingerprint::device_fingerprint;
use shared::validation::validate_device_name;
use validator::Validate;

/// One registered browser or device instance for a user.
///
/// The delivery token is the record's identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Grouping key used to detect several tokens on one physical device.
    pub fn fingerprint(&self) -> String {
        device_fingerprint(self.user_agent.as_deref(), self.platform.as_deref())
    }

    /// The user-given name, or a label derived from the environment strings.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => derive_device_label(self.user_agent.as_deref(), self.platform.as_deref()),
        }
    }
}

/// Raw environment strings of the runtime a session was opened from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEnvironment {
    #[validate(length(max = 1024, message = "User agent must be at most 1024 characters"))]
    pub user_agent: Option<String>,

    #[validate(length(max = 128, message = "Platform must be at most 128 characters"))]
    pub platform: Option<String>,
}

/// Writable fields of a device record, used for upserts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFields {
    pub name: Option<String>,
    pub platform: Option<String>,
    pub user_agent: Option<String>,
    pub enabled: bool,
}

impl DeviceFields {
    /// Fields for a freshly registered, enabled device.
    pub fn from_environment(env: &DeviceEnvironment) -> Self {
        Self {
            name: None,
            platform: env.platform.clone(),
            user_agent: env.user_agent.clone(),
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        self
    }
}

/// Partial update applied to an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl DevicePatch {
    /// Apply the patch to a record in place.
    pub fn apply(&self, record: &mut DeviceRecord) {
        if let Some(name) = &self.name {
            record.name = Some(name.clone());
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(last_seen_at) = self.last_seen_at {
            record.last_seen_at = last_seen_at;
        }
    }
}

/// Per-user scalar fields mirrored on the profile document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    /// True while at least one device of the user is enabled.
    pub notifications_enabled: bool,
    /// Last known active token.
    pub fcm_token: Option<String>,
}

/// Request payload for opting a device in.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    #[validate(custom(function = "validate_device_name"))]
    pub name: Option<String>,
}

/// Request payload for renaming a device.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenameDeviceRequest {
    #[validate(custom(function = "validate_device_name"))]
    pub name: String,
}

/// Request payload for a partial device update.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub enabled: Option<bool>,

    #[validate(custom(function = "validate_device_name"))]
    pub name: Option<String>,
}

/// Device entry as shown on the settings surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub token: String,
    pub display_name: String,
    pub platform: Option<String>,
    pub enabled: bool,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DeviceSummary {
    pub fn from_record(record: DeviceRecord, current_token: Option<&str>) -> Self {
        Self {
            is_current: current_token == Some(record.token.as_str()),
            display_name: record.display_name(),
            token: record.token,
            platform: record.platform,
            enabled: record.enabled,
            created_at: record.created_at,
            last_seen_at: record.last_seen_at,
        }
    }
}
