//! Platform speech capabilities
//!
//! The voice layer never talks to a concrete speech engine. Hosts inject
//! implementations of [`SpeechInput`], [`SpeechOutput`] and
//! [`PermissionGate`]; sessions hand the platform an [`EventSink`] and
//! receive events back through it. Dropping the receiving side detaches the
//! session from any late platform callbacks.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::Result;

/// Channel the platform pushes events into
pub type EventSink<E> = mpsc::UnboundedSender<E>;

/// Speech-to-text session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionConfig {
    /// Keep recognizing after the first final result
    pub continuous: bool,
    /// Deliver provisional results
    pub interim_results: bool,
    /// BCP 47 language tag (e.g. "en-US")
    pub language: String,
    /// Alternatives requested per result
    pub max_alternatives: u32,
}

/// Event emitted by a speech-to-text session
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Audio capture started
    Start,
    /// Interim or final transcript
    Result {
        transcript: String,
        is_final: bool,
        confidence: f32,
    },
    /// Session ended (after stop, abort, error or platform timeout)
    End,
    /// Raw platform failure
    Error { code: String, message: String },
}

/// Speech-to-text capability
pub trait SpeechInput: Send + Sync {
    /// Whether the host exposes speech recognition at all
    fn is_available(&self) -> bool;

    /// Begin a recognition session delivering events into `events`
    ///
    /// # Errors
    ///
    /// Returns error if the platform refuses to start (e.g. already running)
    fn start(&self, config: &RecognitionConfig, events: EventSink<RecognitionEvent>) -> Result<()>;

    /// Stop listening and deliver any pending final result
    fn stop(&self);

    /// Stop listening and discard pending results
    fn abort(&self);
}

/// A voice offered by the synthesis engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceInfo {
    /// Stable identifier (voice URI)
    pub id: String,
    /// Display name
    pub name: String,
    /// BCP 47 language tag
    pub language: String,
    /// Engine default voice
    pub default: bool,
}

/// One unit of text handed to the synthesis engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Identifier echoed back in [`UtteranceEvent`]s
    pub id: u64,
    pub text: String,
    /// Speaking rate (0.5 to 2.0)
    pub rate: f32,
    /// Pitch (0.0 to 2.0)
    pub pitch: f32,
    /// Volume (0.0 to 1.0)
    pub volume: f32,
    /// Voice to use, or the engine default
    pub voice: Option<VoiceInfo>,
}

/// Event emitted for a single utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Start { id: u64 },
    End { id: u64 },
    Error { id: u64, code: String },
}

/// Text-to-speech capability
pub trait SpeechOutput: Send + Sync {
    /// Whether the host exposes speech synthesis at all
    fn is_available(&self) -> bool;

    /// Play an utterance, reporting progress into `events`
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the utterance
    fn speak(&self, utterance: &Utterance, events: EventSink<UtteranceEvent>) -> Result<()>;

    fn pause(&self);

    fn resume(&self);

    /// Drop the current and all engine-queued utterances
    fn cancel(&self);

    /// Voice catalog; may be empty until the engine finishes loading
    fn voices(&self) -> Vec<VoiceInfo>;
}

/// Microphone stream handed out on a permission grant
pub trait MediaStream: Send {
    /// Stop all tracks and release the device
    fn release(self: Box<Self>);
}

/// Outcome of a microphone permission request
pub enum PermissionOutcome {
    Granted(Box<dyn MediaStream>),
    Denied { reason: String },
}

impl std::fmt::Debug for PermissionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted(_) => f.write_str("Granted"),
            Self::Denied { reason } => f.debug_struct("Denied").field("reason", reason).finish(),
        }
    }
}

/// Microphone permission prompt
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Ask the host for microphone access; may wait on the user
    async fn request_microphone(&self) -> PermissionOutcome;
}
