//! Deterministic fingerprints for notifications and devices.
//!
//! These are content keys, not hashes: two notifications that share type,
//! event id and the first 50 characters of title and body map to the same
//! fingerprint on purpose.

/// Number of characters of title and body that participate in a notification fingerprint.
pub const FINGERPRINT_TEXT_CHARS: usize = 50;

/// Placeholder used when a notification carries no event id.
const MISSING_EVENT_ID: &str = "none";

/// Placeholder used for missing device metadata.
pub const UNKNOWN_DEVICE_FIELD: &str = "unknown";

/// Derive the dedup fingerprint of a notification.
///
/// The fields are joined with `-`, then every character outside
/// `[A-Za-z0-9-]` is removed.
pub fn notification_fingerprint(
    kind: &str,
    event_id: Option<&str>,
    title: &str,
    body: &str,
) -> String {
    let raw = format!(
        "{}-{}-{}-{}",
        kind,
        event_id.unwrap_or(MISSING_EVENT_ID),
        truncate_chars(title, FINGERPRINT_TEXT_CHARS),
        truncate_chars(body, FINGERPRINT_TEXT_CHARS),
    );
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

/// Derive the grouping key for a device record from its environment strings.
///
/// Missing or blank values participate as the literal `unknown`, so devices
/// with no metadata at all group together.
pub fn device_fingerprint(user_agent: Option<&str>, platform: Option<&str>) -> String {
    format!("{}_{}", or_unknown(user_agent), or_unknown(platform))
}

fn or_unknown(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => UNKNOWN_DEVICE_FIELD,
    }
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
