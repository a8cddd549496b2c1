//! Human-readable labels for devices that were never named.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Order matters: Edge and Opera advertise Chrome, Chrome advertises Safari.
    static ref BROWSERS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"Edg(e|A|iOS)?/").unwrap(), "Edge"),
        (Regex::new(r"OPR/|Opera").unwrap(), "Opera"),
        (Regex::new(r"SamsungBrowser/").unwrap(), "Samsung Internet"),
        (Regex::new(r"Firefox/|FxiOS/").unwrap(), "Firefox"),
        (Regex::new(r"Chrome/|CriOS/").unwrap(), "Chrome"),
        (Regex::new(r"Safari/").unwrap(), "Safari"),
    ];
    static ref SYSTEMS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"Android").unwrap(), "Android"),
        (Regex::new(r"iPhone|iPad|iPod").unwrap(), "iOS"),
        (Regex::new(r"Windows").unwrap(), "Windows"),
        (Regex::new(r"Mac OS X|Macintosh").unwrap(), "macOS"),
        (Regex::new(r"CrOS").unwrap(), "ChromeOS"),
        (Regex::new(r"Linux").unwrap(), "Linux"),
    ];
}

/// Fallback label when nothing can be detected.
pub const GENERIC_DEVICE_LABEL: &str = "Unknown device";

/// Derive a label such as "Chrome on Windows" from the raw environment strings.
///
/// The operating system is detected from the user agent first and falls back
/// to the platform string.
pub fn derive_device_label(user_agent: Option<&str>, platform: Option<&str>) -> String {
    let ua = user_agent.unwrap_or_default();
    let browser = first_match(&BROWSERS, ua);
    let system = first_match(&SYSTEMS, ua)
        .or_else(|| platform.and_then(|p| first_match(&SYSTEMS, p)))
        .or_else(|| platform.filter(|p| !p.trim().is_empty()).map(str::trim));

    match (browser, system) {
        (Some(b), Some(s)) => format!("{} on {}", b, s),
        (Some(b), None) => b.to_string(),
        (None, Some(s)) => s.to_string(),
        (None, None) => GENERIC_DEVICE_LABEL.to_string(),
    }
}

fn first_match<'a>(table: &[(Regex, &'a str)], haystack: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|(re, _)| re.is_match(haystack))
        .map(|(_, name)| *name)
}
