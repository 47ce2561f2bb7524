//! Error types for the Credora voice layer

use thiserror::Error;

use crate::voice::VoiceError;

/// Result type alias for voice layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice layer
///
/// Domain failures reported by the speech platform are carried as
/// [`VoiceError`]; the remaining variants cover configuration and storage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Settings persistence error
    #[error("settings error: {0}")]
    Settings(String),

    /// Speech platform rejected a call
    #[error("platform error: {0}")]
    Platform(String),

    /// Classified voice error
    #[error(transparent)]
    Voice(#[from] VoiceError),

    /// The session task has been disposed
    #[error("session closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Return the classified voice error, if this is one
    #[must_use]
    pub const fn as_voice(&self) -> Option<&VoiceError> {
        match self {
            Self::Voice(e) => Some(e),
            _ => None,
        }
    }
}
