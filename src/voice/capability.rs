//! Host capability detection
//!
//! Inspects the host once and reports which voice capabilities exist, plus
//! the host name and version for version-gated behavior.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Host identification patterns, checked in order
///
/// Edge and Opera embed a Chrome token, so they must be matched first.
static HOST_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Edge", r"Edg(?:e|A|iOS)?/(\d+(?:\.\d+)?)"),
        ("Opera", r"(?:OPR|Opera)/(\d+(?:\.\d+)?)"),
        ("Chrome", r"(?:Chrome|CriOS)/(\d+(?:\.\d+)?)"),
        ("Firefox", r"(?:Firefox|FxiOS)/(\d+(?:\.\d+)?)"),
        ("Safari", r"Version/(\d+(?:\.\d+)?).*Safari/"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Hosts known to ship working speech APIs from a minimum version
const ALLOW_LIST: &[(&str, (u32, u32))] = &[
    ("Chrome", (25, 0)),
    ("Edge", (79, 0)),
    ("Safari", (14, 1)),
    ("Opera", (27, 0)),
];

/// Raw host globals probed by the embedding application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGlobals {
    pub speech_recognition: bool,
    pub speech_synthesis: bool,
    pub media_devices: bool,
    pub user_agent: String,
}

/// Detected voice capabilities of the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSupport {
    pub speech_recognition: bool,
    pub speech_synthesis: bool,
    pub media_devices: bool,
    pub host_name: String,
    pub host_version: String,
}

/// Detect capabilities from the probed host globals
#[must_use]
pub fn detect(globals: &HostGlobals) -> BrowserSupport {
    let (host_name, host_version) = identify_host(&globals.user_agent);

    let support = BrowserSupport {
        speech_recognition: globals.speech_recognition,
        speech_synthesis: globals.speech_synthesis,
        media_devices: globals.media_devices,
        host_name: host_name.to_string(),
        host_version,
    };

    tracing::debug!(
        host = %support.host_name,
        version = %support.host_version,
        stt = support.speech_recognition,
        tts = support.speech_synthesis,
        mic = support.media_devices,
        "voice capabilities detected"
    );

    support
}

/// Whether any voice feature can be offered
#[must_use]
pub fn is_supported(support: &BrowserSupport) -> bool {
    support.speech_recognition || support.speech_synthesis || is_allow_listed(support)
}

/// Explain to the user why voice input is unavailable
#[must_use]
pub fn unsupported_message(support: &BrowserSupport) -> String {
    match support.host_name.as_str() {
        "Firefox" => "Firefox does not support speech recognition. Voice input requires \
                      Chrome, Edge or Safari; spoken responses may still work."
            .to_string(),
        "Safari" if !is_allow_listed(support) => format!(
            "Safari {} does not support voice input. Please update to Safari 14.1 or later.",
            support.host_version
        ),
        "Unknown" => "Voice features are not supported in this browser. Please use a recent \
                      version of Chrome, Edge or Safari."
            .to_string(),
        name if !support.media_devices => format!(
            "{name} cannot access a microphone here. Voice input requires a secure (HTTPS) \
             connection and a connected microphone."
        ),
        name => format!(
            "Voice features are not available in {name} {}. Please update your browser or \
             switch to Chrome, Edge or Safari.",
            support.host_version
        ),
    }
}

fn identify_host(user_agent: &str) -> (&'static str, String) {
    HOST_PATTERNS
        .iter()
        .find_map(|(name, re)| {
            re.captures(user_agent)
                .and_then(|c| c.get(1))
                .map(|m| (*name, m.as_str().to_string()))
        })
        .unwrap_or(("Unknown", String::new()))
}

fn is_allow_listed(support: &BrowserSupport) -> bool {
    let Some(version) = parse_version(&support.host_version) else {
        return false;
    };
    ALLOW_LIST
        .iter()
        .any(|(name, min)| *name == support.host_name && version >= *min)
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}
