//! Wake word detection
//!
//! Runs an always-on background recognition session tuned for short phrase
//! spotting. Every interim or final transcript is matched against a fixed
//! phrase set; a hit fires [`WakeEvent::Detected`], starts a cooldown, and
//! stops the platform session so its buffer is flushed.
//!
//! The detector does not coordinate with foreground sessions. Callers disable
//! it while a [`RecognitionSession`](super::RecognitionSession) or
//! [`VoiceAgent`](super::VoiceAgent) holds the microphone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::classify::{VoiceError, VoiceErrorKind, classify};
use super::platform::{RecognitionConfig, RecognitionEvent, SpeechInput};
use super::sleep_until_deadline;
use crate::config::VoiceConfig;

/// Hits within this window after a detection are suppressed
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3000);

/// Delay before restarting after the platform ends a session
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Delay before restarting after a non-fatal error
pub const DEFAULT_ERROR_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Canonical phrases, short aliases, and common mis-hearings
pub const DEFAULT_WAKE_PHRASES: &[&str] = &[
    "hey credora",
    "ok credora",
    "okay credora",
    "hi credora",
    "credora",
    "hey cradora",
    "hey credo ra",
    "hey credit ora",
    "hey kredora",
    "hey corridora",
];

/// Find the wake phrase contained in `transcript`, if any
///
/// The transcript is lower-cased and trimmed, then each phrase is tested as
/// an exact match, a prefix followed by a space, an interior match bounded
/// by spaces, or a suffix preceded by a space.
#[must_use]
pub fn match_wake_phrase<'a>(transcript: &str, phrases: &'a [String]) -> Option<&'a str> {
    let normalized = transcript.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    phrases
        .iter()
        .map(String::as_str)
        .find(|phrase| contains_phrase(&normalized, phrase))
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    text == phrase
        || text.starts_with(&format!("{phrase} "))
        || text.contains(&format!(" {phrase} "))
        || text.ends_with(&format!(" {phrase}"))
}

/// Options for the wake word detector
#[derive(Debug, Clone)]
pub struct WakeWordOptions {
    pub phrases: Vec<String>,
    pub language: String,
    pub cooldown: Duration,
    pub restart_delay: Duration,
    pub error_restart_delay: Duration,
}

impl Default for WakeWordOptions {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            language: "en-US".to_string(),
            cooldown: DEFAULT_COOLDOWN,
            restart_delay: DEFAULT_RESTART_DELAY,
            error_restart_delay: DEFAULT_ERROR_RESTART_DELAY,
        }
    }
}

impl WakeWordOptions {
    /// Build options from the tuning configuration
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            phrases: config.wake_phrases.clone(),
            language: config.language.clone(),
            cooldown: config.wake_cooldown,
            restart_delay: config.wake_restart_delay,
            error_restart_delay: config.wake_error_restart_delay,
        }
    }
}

/// Event emitted by the detector
#[derive(Debug, Clone, PartialEq)]
pub enum WakeEvent {
    /// A wake phrase was heard
    Detected { phrase: String, transcript: String },
    /// Background listening started or stopped
    ListeningChanged(bool),
    Error(VoiceError),
}

/// Point-in-time view of the detector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorStatus {
    pub enabled: bool,
    pub listening: bool,
    pub last_detected: Option<String>,
    /// Halted by a permission or capability error until re-enabled
    pub halted: bool,
}

enum Command {
    SetEnabled(bool, oneshot::Sender<()>),
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Dispose,
}

/// Background wake word detector
///
/// Must be created inside a tokio runtime.
pub struct WakeWordDetector {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<DetectorStatus>,
    alive: Arc<AtomicBool>,
}

impl WakeWordDetector {
    /// Create a detector and the receiver for its events
    ///
    /// Phrases are normalized to lower case; the detector starts disabled.
    #[must_use]
    pub fn with_receiver(
        input: Arc<dyn SpeechInput>,
        mut options: WakeWordOptions,
    ) -> (Self, mpsc::UnboundedReceiver<WakeEvent>) {
        options.phrases = options
            .phrases
            .into_iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        tracing::debug!(wake_phrases = ?options.phrases, "wake word detector initialized");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(DetectorStatus::default());
        let alive = Arc::new(AtomicBool::new(true));

        let task = DetectorTask {
            input,
            options,
            commands: command_rx,
            platform_rx,
            platform_tx,
            events: event_tx,
            status: status_tx,
            alive: Arc::clone(&alive),
            enabled: false,
            listening: false,
            halted: false,
            last_detected: None,
            cooldown_until: None,
            restart_at: None,
            pending_error: None,
        };
        tokio::spawn(task.run());

        let detector = Self {
            commands: command_tx,
            status: status_rx,
            alive,
        };
        (detector, event_rx)
    }

    /// Enable or disable background listening
    ///
    /// Enabling starts listening; disabling stops it and cancels restarts.
    /// Re-enabling also clears a permission halt.
    pub async fn set_enabled(&self, enabled: bool) {
        self.request(|tx| Command::SetEnabled(enabled, tx)).await;
    }

    /// Start listening if enabled
    pub async fn start(&self) {
        self.request(Command::Start).await;
    }

    /// Stop listening and cancel pending restarts
    pub async fn stop(&self) {
        self.request(Command::Stop).await;
    }

    /// Tear the detector down; later platform events are ignored
    pub fn dispose(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Dispose);
            tracing::debug!("wake word detector disposed");
        }
    }

    #[must_use]
    pub fn status(&self) -> DetectorStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.status.borrow().listening
    }

    /// Subscribe to status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DetectorStatus> {
        self.status.clone()
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for WakeWordDetector {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct DetectorTask {
    input: Arc<dyn SpeechInput>,
    options: WakeWordOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    platform_rx: mpsc::UnboundedReceiver<RecognitionEvent>,
    platform_tx: mpsc::UnboundedSender<RecognitionEvent>,
    events: mpsc::UnboundedSender<WakeEvent>,
    status: watch::Sender<DetectorStatus>,
    alive: Arc<AtomicBool>,
    enabled: bool,
    listening: bool,
    halted: bool,
    last_detected: Option<String>,
    cooldown_until: Option<Instant>,
    restart_at: Option<Instant>,
    pending_error: Option<VoiceErrorKind>,
}

impl DetectorTask {
    async fn run(mut self) {
        loop {
            let restart_at = self.restart_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispose) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.platform_rx.recv() => self.handle_platform_event(event),
                () = sleep_until_deadline(restart_at) => {
                    self.restart_at = None;
                    self.begin_listening();
                }
            }
        }

        self.restart_at = None;
        if self.listening {
            self.input.abort();
        }
        self.platform_rx.close();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetEnabled(enabled, reply) => {
                if enabled && !self.enabled {
                    self.enabled = true;
                    self.halted = false;
                    tracing::info!("wake word detection enabled");
                    self.begin_listening();
                } else if !enabled && self.enabled {
                    self.enabled = false;
                    tracing::info!("wake word detection disabled");
                    self.stop_listening();
                }
                let _ = reply.send(());
            }
            Command::Start(reply) => {
                if self.enabled {
                    self.halted = false;
                    self.begin_listening();
                } else {
                    tracing::debug!("wake word start ignored while disabled");
                }
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop_listening();
                let _ = reply.send(());
            }
            Command::Dispose => {}
        }
    }

    fn begin_listening(&mut self) {
        if !self.enabled || self.halted || self.listening || !self.is_alive() {
            return;
        }

        if !self.input.is_available() {
            self.halted = true;
            let error = VoiceError::not_supported(
                "Wake word detection requires speech recognition support.",
            );
            self.report(error);
            return;
        }

        let config = RecognitionConfig {
            continuous: true,
            interim_results: true,
            language: self.options.language.clone(),
            max_alternatives: 1,
        };

        match self.input.start(&config, self.platform_tx.clone()) {
            Ok(()) => {
                self.listening = true;
                tracing::debug!("wake word listening started");
                self.emit(WakeEvent::ListeningChanged(true));
                self.publish();
            }
            Err(e) => {
                let error = classify("aborted", &e.to_string());
                self.report(error);
                self.schedule_restart(self.options.error_restart_delay);
            }
        }
    }

    fn stop_listening(&mut self) {
        self.restart_at = None;
        self.pending_error = None;
        if self.listening {
            self.input.stop();
            self.listening = false;
            tracing::debug!("wake word listening stopped");
            self.emit(WakeEvent::ListeningChanged(false));
        }
        // The stopped recognizer keeps the old sink; its late end and
        // results are dropped with the old receiver
        let (tx, rx) = mpsc::unbounded_channel();
        self.platform_tx = tx;
        self.platform_rx = rx;
        self.publish();
    }

    fn handle_platform_event(&mut self, event: RecognitionEvent) {
        if !self.is_alive() {
            return;
        }

        match event {
            RecognitionEvent::Start => {}
            RecognitionEvent::Result { transcript, .. } => self.handle_transcript(&transcript),
            RecognitionEvent::Error { code, message } => {
                let error = classify(&code, &message);
                self.pending_error = Some(error.kind);
                if error.kind.is_terminal() {
                    self.halted = true;
                    self.restart_at = None;
                    tracing::warn!(kind = %error.kind, "wake word detection halted");
                }
                self.report(error);
            }
            RecognitionEvent::End => self.handle_end(),
        }
    }

    fn handle_transcript(&mut self, transcript: &str) {
        if !self.enabled {
            return;
        }

        let now = Instant::now();
        if self.cooldown_until.is_some_and(|until| now < until) {
            tracing::trace!(transcript, "wake word suppressed during cooldown");
            return;
        }

        let Some(phrase) = match_wake_phrase(transcript, &self.options.phrases) else {
            return;
        };
        let phrase = phrase.to_string();

        tracing::info!(phrase, transcript, "wake word detected");
        self.last_detected = Some(phrase.clone());
        self.cooldown_until = Some(now + self.options.cooldown);
        self.emit(WakeEvent::Detected {
            phrase,
            transcript: transcript.to_string(),
        });

        // Let the session end on its own so the recognizer buffer is flushed
        if self.listening {
            self.input.stop();
        }
        self.publish();
    }

    fn handle_end(&mut self) {
        let was_listening = std::mem::replace(&mut self.listening, false);
        let error = self.pending_error.take();
        if was_listening {
            self.emit(WakeEvent::ListeningChanged(false));
        }
        self.publish();

        if !self.enabled || self.halted {
            return;
        }

        let delay = match error {
            Some(
                VoiceErrorKind::NoSpeech | VoiceErrorKind::Aborted | VoiceErrorKind::AudioCapture,
            ) => self.options.error_restart_delay,
            _ => self.options.restart_delay,
        };

        // During cooldown, resume only once it has elapsed
        let now = Instant::now();
        let delay = match self.cooldown_until {
            Some(until) if now < until => (until - now) + delay,
            _ => delay,
        };

        self.schedule_restart(delay);
    }

    fn schedule_restart(&mut self, delay: Duration) {
        tracing::debug!(delay_ms = delay.as_millis(), "wake word restart scheduled");
        self.restart_at = Some(Instant::now() + delay);
    }

    fn report(&self, error: VoiceError) {
        tracing::warn!(
            kind = %error.kind,
            timestamp = %error.timestamp,
            "wake word error: {}",
            error.message
        );
        self.emit(WakeEvent::Error(error));
        self.publish();
    }

    fn publish(&self) {
        if !self.is_alive() {
            return;
        }
        self.status.send_replace(DetectorStatus {
            enabled: self.enabled,
            listening: self.listening,
            last_detected: self.last_detected.clone(),
            halted: self.halted,
        });
    }

    fn emit(&self, event: WakeEvent) {
        if self.is_alive() {
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases() -> Vec<String> {
        WakeWordOptions::default().phrases
    }

    #[test]
    fn exact_match() {
        assert_eq!(match_wake_phrase("hey credora", &phrases()), Some("hey credora"));
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(
            match_wake_phrase("  Hey CREDORA ", &phrases()),
            Some("hey credora")
        );
    }

    #[test]
    fn prefix_match() {
        assert_eq!(
            match_wake_phrase("hey credora show my cash flow", &phrases()),
            Some("hey credora")
        );
    }

    #[test]
    fn interior_match() {
        assert_eq!(
            match_wake_phrase("please hey credora now", &phrases()),
            Some("hey credora")
        );
    }

    #[test]
    fn suffix_match() {
        assert_eq!(match_wake_phrase("so hey credora", &phrases()), Some("hey credora"));
    }

    #[test]
    fn no_boundary_no_match() {
        assert_eq!(match_wake_phrase("credoraa", &phrases()), None);
        assert_eq!(match_wake_phrase("heycredora", &phrases()), None);
    }

    #[test]
    fn mis_hearing_alias_matches() {
        assert_eq!(
            match_wake_phrase("hey credit ora what's my runway", &phrases()),
            Some("hey credit ora")
        );
    }

    #[test]
    fn unrelated_speech_does_not_match() {
        assert_eq!(match_wake_phrase("hello world", &phrases()), None);
        assert_eq!(match_wake_phrase("", &phrases()), None);
    }

    #[test]
    fn empty_phrase_never_matches() {
        assert_eq!(match_wake_phrase("anything", &[String::new()]), None);
    }
}
