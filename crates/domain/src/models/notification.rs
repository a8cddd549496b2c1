//! Notification models for the delivery pipeline and local history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::fingerprint::notification_fingerprint;

/// Notification type used when the payload does not carry one.
pub const DEFAULT_NOTIFICATION_TYPE: &str = "general";

/// Navigation target used when the payload does not carry one.
pub const DEFAULT_NOTIFICATION_URL: &str = "/";

/// Title used when a payload has a body but no title.
pub const DEFAULT_NOTIFICATION_TITLE: &str = "New notification";

/// Execution context through which a notification reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySource {
    /// Listener running in the visible page.
    Foreground,
    /// Background worker context, possibly with no visible UI.
    Background,
    /// Reconciliation check run when the console is opened.
    OnOpen,
}

impl DeliverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::OnOpen => "on_open",
        }
    }
}

impl std::fmt::Display for DeliverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliverySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "foreground" => Ok(Self::Foreground),
            "background" => Ok(Self::Background),
            "on_open" => Ok(Self::OnOpen),
            _ => Err(format!("Unknown delivery source: {}", s)),
        }
    }
}

/// A notification as received from any delivery path, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingNotification {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

fn default_kind() -> String {
    DEFAULT_NOTIFICATION_TYPE.to_string()
}

impl IncomingNotification {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: kind.into(),
            event_id: None,
            url: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Dedup key of this notification.
    pub fn fingerprint(&self) -> String {
        notification_fingerprint(&self.kind, self.event_id.as_deref(), &self.title, &self.body)
    }

    /// Rebuild a notification from a raw push message.
    ///
    /// Accepts both the provider envelope (`notification` + `data` objects)
    /// and a flat data map. Returns `None` when the message has neither a
    /// title nor a body, i.e. it is a silent data message.
    pub fn from_push_data(message: &Value) -> Option<Self> {
        let display = message.get("notification");
        let data = message.get("data").filter(|d| d.is_object()).unwrap_or(message);

        let title = display
            .and_then(|n| str_field(n, &["title"]))
            .or_else(|| str_field(data, &["title"]));
        let body = display
            .and_then(|n| str_field(n, &["body"]))
            .or_else(|| str_field(data, &["body"]));

        if title.is_none() && body.is_none() {
            return None;
        }

        let url = str_field(data, &["url", "link"])
            .or_else(|| display.and_then(|n| str_field(n, &["click_action"])))
            .or_else(|| {
                message
                    .get("fcmOptions")
                    .and_then(|o| str_field(o, &["link"]))
            });

        Some(Self {
            title: title.unwrap_or(DEFAULT_NOTIFICATION_TITLE).to_string(),
            body: body.unwrap_or_default().to_string(),
            kind: str_field(data, &["type"])
                .unwrap_or(DEFAULT_NOTIFICATION_TYPE)
                .to_string(),
            event_id: str_field(data, &["eventId", "event_id"]).map(String::from),
            url: url.map(String::from),
        })
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// One entry of the local notification history.
///
/// The id is the dedup fingerprint, so it is not unique across time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub event_id: Option<String>,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub source: DeliverySource,
}

impl NotificationRecord {
    /// Build the unread history entry for a notification the dedup engine accepted.
    pub fn accepted(
        incoming: IncomingNotification,
        id: String,
        source: DeliverySource,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: incoming.title,
            body: incoming.body,
            kind: incoming.kind,
            event_id: incoming.event_id,
            url: incoming
                .url
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_URL.to_string()),
            timestamp: at,
            read: false,
            source,
        }
    }
}
