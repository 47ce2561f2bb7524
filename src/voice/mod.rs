//! Voice interaction layer
//!
//! Wake word spotting, foreground speech-to-text sessions, text-to-speech
//! playback and the turn-taking agent. Recognition and synthesis are
//! delegated to platform capabilities injected through the traits in
//! [`platform`].

mod agent;
pub mod capability;
mod chunking;
mod classify;
pub mod platform;
mod recognition;
mod retry;
mod synthesis;
mod wake_word;

use tokio::time::Instant;

pub use agent::{AgentEvent, AgentOptions, AgentPhase, AgentSnapshot, VoiceAgent};
pub use capability::{BrowserSupport, HostGlobals, detect, is_supported, unsupported_message};
pub use chunking::{DEFAULT_CHUNK_LIMIT, chunk_for_speech};
pub use classify::{
    AUTO_HIDE_AFTER, Notification, RetryAction, Severity, VoiceError, VoiceErrorKind, classify,
    to_notification,
};
pub use platform::{
    EventSink, MediaStream, PermissionGate, PermissionOutcome, RecognitionConfig,
    RecognitionEvent, SpeechInput, SpeechOutput, Utterance, UtteranceEvent, VoiceInfo,
};
pub use recognition::{
    RecognitionOptions, RecognitionSession, RecognitionState, SessionEvent, SessionSnapshot,
    Transcript,
};
pub use retry::{MAX_RETRY_ATTEMPTS, RETRY_DELAYS_MS, RetryPolicy, retry_delay, should_retry};
pub use synthesis::{SynthesisEvent, SynthesisQueue, SynthesisState};
pub use wake_word::{
    DEFAULT_WAKE_PHRASES, DetectorStatus, WakeEvent, WakeWordDetector, WakeWordOptions,
    match_wake_phrase,
};

/// Sleep until `deadline`, or forever when there is none
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
