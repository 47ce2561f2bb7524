//! Voice error taxonomy and classification
//!
//! Maps raw platform error codes into a closed set of [`VoiceErrorKind`]s and
//! renders them into user-facing [`Notification`] descriptors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How long transient notifications stay on screen
pub const AUTO_HIDE_AFTER: Duration = Duration::from_millis(5000);

/// Closed set of voice failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceErrorKind {
    NotSupported,
    PermissionDenied,
    NoSpeech,
    Network,
    Aborted,
    AudioCapture,
    SynthesisFailed,
}

impl VoiceErrorKind {
    /// Stable wire code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotSupported => "not-supported",
            Self::PermissionDenied => "permission-denied",
            Self::NoSpeech => "no-speech",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::AudioCapture => "audio-capture",
            Self::SynthesisFailed => "synthesis-failed",
        }
    }

    /// Permission and capability failures need user action to clear
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::NotSupported | Self::PermissionDenied)
    }

    const fn title(self) -> &'static str {
        match self {
            Self::NotSupported => "Voice Not Supported",
            Self::PermissionDenied => "Microphone Access Denied",
            Self::NoSpeech => "No Speech Detected",
            Self::Network => "Network Error",
            Self::Aborted => "Voice Input Stopped",
            Self::AudioCapture => "Microphone Error",
            Self::SynthesisFailed => "Speech Playback Failed",
        }
    }

    const fn default_message(self) -> &'static str {
        match self {
            Self::NotSupported => "Voice features are not supported in this environment.",
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone access in your browser settings to use voice input."
            }
            Self::NoSpeech => "No speech was detected. Please try speaking again.",
            Self::Network => "A network error interrupted speech recognition.",
            Self::Aborted => "Speech recognition was interrupted.",
            Self::AudioCapture => {
                "No microphone was found or it is in use by another application."
            }
            Self::SynthesisFailed => "The response could not be spoken aloud.",
        }
    }
}

impl fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified voice failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct VoiceError {
    pub kind: VoiceErrorKind,
    pub message: String,
    /// Whether retrying without user action can succeed
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

impl VoiceError {
    /// Create an error with the kind's default recoverability
    #[must_use]
    pub fn new(kind: VoiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: !kind.is_terminal(),
            timestamp: Utc::now(),
        }
    }

    /// Override recoverability; terminal kinds always stay unrecoverable
    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable && !self.kind.is_terminal();
        self
    }

    #[must_use]
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(VoiceErrorKind::NotSupported, message)
    }

    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(VoiceErrorKind::PermissionDenied, message)
    }

    #[must_use]
    pub fn synthesis_failed(message: impl Into<String>) -> Self {
        Self::new(VoiceErrorKind::SynthesisFailed, message)
    }
}

/// Classify a raw platform error code
///
/// Unknown codes become [`VoiceErrorKind::Aborted`] with the code embedded in
/// the message so they remain diagnosable.
#[must_use]
pub fn classify(raw_code: &str, raw_message: &str) -> VoiceError {
    let code = raw_code.trim().to_ascii_lowercase();
    let kind = match code.as_str() {
        "not-allowed" | "permission-denied" | "service-not-allowed" | "service-denied" => {
            Some(VoiceErrorKind::PermissionDenied)
        }
        "no-speech" => Some(VoiceErrorKind::NoSpeech),
        "network" => Some(VoiceErrorKind::Network),
        "aborted" => Some(VoiceErrorKind::Aborted),
        "audio-capture" => Some(VoiceErrorKind::AudioCapture),
        "not-supported" => Some(VoiceErrorKind::NotSupported),
        "synthesis-failed" => Some(VoiceErrorKind::SynthesisFailed),
        _ => None,
    };

    let error = kind.map_or_else(
        || {
            let message = if raw_message.is_empty() {
                format!("Speech recognition error: {raw_code}")
            } else {
                format!("Speech recognition error: {raw_code} ({raw_message})")
            };
            VoiceError::new(VoiceErrorKind::Aborted, message)
        },
        |kind| {
            let detail = raw_message.trim();
            if detail.is_empty() {
                VoiceError::new(kind, kind.default_message())
            } else {
                VoiceError::new(kind, format!("{} ({detail})", kind.default_message()))
            }
        },
    );

    tracing::warn!(
        kind = %error.kind,
        raw_code,
        raw_message,
        recoverable = error.recoverable,
        timestamp = %error.timestamp,
        "voice error classified"
    );

    error
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Retry button attached to a notification
#[derive(Clone)]
pub struct RetryAction {
    pub label: String,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl RetryAction {
    /// Run the retry callback
    pub fn invoke(&self) {
        (self.callback)();
    }
}

impl fmt::Debug for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// User-facing notification descriptor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(skip)]
    pub action: Option<RetryAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_hide_ms: Option<u64>,
}

impl Notification {
    #[must_use]
    pub fn auto_hide(&self) -> Option<Duration> {
        self.auto_hide_ms.map(Duration::from_millis)
    }
}

/// Render an error into a notification
///
/// A retry action is attached only when the error is recoverable and a
/// callback is supplied.
#[must_use]
pub fn to_notification(
    error: &VoiceError,
    retry: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Notification {
    let severity = if error.recoverable {
        Severity::Warning
    } else {
        Severity::Error
    };

    let auto_hide_ms = matches!(error.kind, VoiceErrorKind::NoSpeech | VoiceErrorKind::Aborted)
        .then(|| u64::try_from(AUTO_HIDE_AFTER.as_millis()).unwrap_or(u64::MAX));

    let action = retry
        .filter(|_| error.recoverable)
        .map(|callback| RetryAction {
            label: "Try again".to_string(),
            callback,
        });

    Notification {
        severity,
        title: error.kind.title().to_string(),
        message: error.message.clone(),
        action,
        auto_hide_ms,
    }
}
