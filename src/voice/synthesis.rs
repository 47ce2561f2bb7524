//! Speech synthesis queue
//!
//! Splits text into sentence-bounded chunks and plays them one at a time
//! through the platform [`SpeechOutput`]. Observers see a single utterance:
//! [`SynthesisEvent::Started`] fires when the first chunk starts and
//! [`SynthesisEvent::Finished`] only after the last chunk ends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use super::chunking::{DEFAULT_CHUNK_LIMIT, chunk_for_speech};
use super::classify::VoiceError;
use super::platform::{SpeechOutput, Utterance, UtteranceEvent, VoiceInfo};
use crate::settings::VoiceSettings;
use crate::{Error, Result};

/// Interval between voice catalog polls
const VOICE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error codes the engine reports for utterances we cancelled ourselves
const CANCELLED_CODES: &[&str] = &["canceled", "cancelled", "interrupted"];

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesisState {
    #[default]
    Idle,
    Speaking,
    Paused,
    Error,
}

/// Event delivered to the queue owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    StateChanged(SynthesisState),
    /// First chunk of the current utterance started playing
    Started,
    /// Last chunk of the current utterance finished
    Finished,
    Error(VoiceError),
}

enum Command {
    Speak(String, oneshot::Sender<std::result::Result<(), VoiceError>>),
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Dispose,
}

/// Handle to the synthesis queue
///
/// Must be created inside a tokio runtime.
pub struct SynthesisQueue {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SynthesisState>,
    output: Arc<dyn SpeechOutput>,
    alive: Arc<AtomicBool>,
}

impl SynthesisQueue {
    /// Create a queue and the receiver for its events
    ///
    /// `settings` supplies the rate, pitch, volume and voice applied to each
    /// new utterance.
    #[must_use]
    pub fn with_receiver(
        output: Arc<dyn SpeechOutput>,
        settings: watch::Receiver<VoiceSettings>,
        chunk_limit: usize,
    ) -> (Self, mpsc::UnboundedReceiver<SynthesisEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SynthesisState::Idle);
        let alive = Arc::new(AtomicBool::new(true));

        let task = QueueTask {
            output: Arc::clone(&output),
            settings,
            chunk_limit: if chunk_limit == 0 {
                DEFAULT_CHUNK_LIMIT
            } else {
                chunk_limit
            },
            commands: command_rx,
            platform_rx,
            platform_tx,
            events: event_tx,
            state_tx,
            alive: Arc::clone(&alive),
            state: SynthesisState::Idle,
            queue: VecDeque::new(),
            current: None,
            started: false,
            next_id: 0,
        };
        tokio::spawn(task.run());

        let queue = Self {
            commands: command_tx,
            state: state_rx,
            output,
            alive,
        };
        (queue, event_rx)
    }

    /// Replace any playback with `text`
    ///
    /// Returns once playback has been queued, not when it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Voice`] when synthesis is unsupported or the engine
    /// rejects the first chunk
    pub async fn speak(&self, text: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Speak(text.into(), tx))?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(())
    }

    pub async fn pause(&self) {
        self.request(Command::Pause).await;
    }

    pub async fn resume(&self) {
        self.request(Command::Resume).await;
    }

    /// Cancel playback and empty the queue
    pub async fn stop(&self) {
        self.request(Command::Stop).await;
    }

    /// Tear the queue down; later platform events are ignored
    pub fn dispose(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Dispose);
            tracing::debug!("synthesis queue disposed");
        }
    }

    #[must_use]
    pub fn state(&self) -> SynthesisState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.state() == SynthesisState::Speaking
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SynthesisState> {
        self.state.clone()
    }

    /// Current voice catalog; may be empty while the engine loads
    #[must_use]
    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.output.voices()
    }

    /// Poll the voice catalog until it populates or `timeout` elapses
    pub async fn wait_for_voices(&self, timeout: Duration) -> Vec<VoiceInfo> {
        let poll = async {
            let mut interval = tokio::time::interval(VOICE_POLL_INTERVAL);
            loop {
                interval.tick().await;
                let voices = self.output.voices();
                if !voices.is_empty() {
                    return voices;
                }
            }
        };

        if let Ok(voices) = tokio::time::timeout(timeout, poll).await {
            tracing::debug!(count = voices.len(), "voice catalog loaded");
            voices
        } else {
            tracing::warn!(
                timeout_ms = timeout.as_millis(),
                "voice catalog still empty"
            );
            Vec::new()
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (tx, rx) = oneshot::channel();
        if self.send(command(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for SynthesisQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Pick the configured voice, falling back to the engine default
fn resolve_voice(voices: &[VoiceInfo], selected: Option<&str>) -> Option<VoiceInfo> {
    selected
        .and_then(|id| voices.iter().find(|v| v.id == id))
        .or_else(|| voices.iter().find(|v| v.default))
        .cloned()
}

struct QueueTask {
    output: Arc<dyn SpeechOutput>,
    settings: watch::Receiver<VoiceSettings>,
    chunk_limit: usize,
    commands: mpsc::UnboundedReceiver<Command>,
    platform_rx: mpsc::UnboundedReceiver<UtteranceEvent>,
    platform_tx: mpsc::UnboundedSender<UtteranceEvent>,
    events: mpsc::UnboundedSender<SynthesisEvent>,
    state_tx: watch::Sender<SynthesisState>,
    alive: Arc<AtomicBool>,
    state: SynthesisState,
    queue: VecDeque<Utterance>,
    /// Utterance currently handed to the engine
    current: Option<u64>,
    /// Whether the first chunk of this utterance has started
    started: bool,
    next_id: u64,
}

impl QueueTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispose) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.platform_rx.recv() => self.handle_platform_event(event),
            }
        }

        if self.current.take().is_some() {
            self.output.cancel();
        }
        self.queue.clear();
        self.platform_rx.close();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Speak(text, reply) => {
                let _ = reply.send(self.speak(&text));
            }
            Command::Pause(reply) => {
                // A chunk handed to the engine but not yet started pauses too
                let pending = self.state == SynthesisState::Idle && self.current.is_some();
                if self.state == SynthesisState::Speaking || pending {
                    self.output.pause();
                    self.set_state(SynthesisState::Paused);
                }
                let _ = reply.send(());
            }
            Command::Resume(reply) => {
                if self.state == SynthesisState::Paused {
                    self.output.resume();
                    self.set_state(SynthesisState::Speaking);
                }
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.halt();
                self.set_state(SynthesisState::Idle);
                let _ = reply.send(());
            }
            Command::Dispose => {}
        }
    }

    fn speak(&mut self, text: &str) -> std::result::Result<(), VoiceError> {
        if !self.output.is_available() {
            let error =
                VoiceError::not_supported("Speech synthesis is not supported in this browser.");
            self.fail(error.clone());
            return Err(error);
        }

        self.halt();
        self.set_state(SynthesisState::Idle);

        let chunks = chunk_for_speech(text, self.chunk_limit);
        if chunks.is_empty() {
            return Ok(());
        }

        let settings = self.settings.borrow().clone();
        let voices = self.output.voices();
        let voice = resolve_voice(&voices, settings.selected_voice_id.as_deref());

        tracing::debug!(
            chunks = chunks.len(),
            chars = text.chars().count(),
            voice = voice.as_ref().map(|v| v.id.as_str()),
            "queueing utterance"
        );

        for text in chunks {
            self.next_id += 1;
            self.queue.push_back(Utterance {
                id: self.next_id,
                text,
                rate: settings.speech_rate,
                pitch: settings.speech_pitch,
                volume: settings.speech_volume,
                voice: voice.clone(),
            });
        }

        self.started = false;
        self.play_next()
    }

    fn play_next(&mut self) -> std::result::Result<(), VoiceError> {
        let Some(utterance) = self.queue.pop_front() else {
            return Ok(());
        };

        if let Err(e) = self.output.speak(&utterance, self.platform_tx.clone()) {
            let error = VoiceError::synthesis_failed(format!("Speech playback failed: {e}"));
            self.queue.clear();
            self.current = None;
            self.fail(error.clone());
            return Err(error);
        }

        self.current = Some(utterance.id);
        Ok(())
    }

    /// Cancel the engine and drop queued chunks
    fn halt(&mut self) {
        let had_work = self.current.take().is_some() || !self.queue.is_empty();
        self.queue.clear();
        self.started = false;
        if had_work {
            self.output.cancel();
            tracing::debug!("synthesis cancelled");
        }
    }

    fn handle_platform_event(&mut self, event: UtteranceEvent) {
        if !self.is_alive() {
            return;
        }

        match event {
            UtteranceEvent::Start { id } if self.current == Some(id) => {
                if !self.started {
                    self.started = true;
                    if self.state != SynthesisState::Paused {
                        self.set_state(SynthesisState::Speaking);
                    }
                    self.emit(SynthesisEvent::Started);
                }
            }
            UtteranceEvent::End { id } if self.current == Some(id) => {
                self.current = None;
                if self.queue.is_empty() {
                    self.started = false;
                    tracing::debug!("utterance finished");
                    self.set_state(SynthesisState::Idle);
                    self.emit(SynthesisEvent::Finished);
                } else {
                    // Failures are reported through fail()
                    let _ = self.play_next();
                }
            }
            UtteranceEvent::Error { id, code } if self.current == Some(id) => {
                if CANCELLED_CODES.contains(&code.as_str()) {
                    tracing::debug!(id, code, "utterance cancelled");
                    return;
                }
                let error = VoiceError::synthesis_failed(format!("Speech playback failed: {code}"));
                self.current = None;
                self.queue.clear();
                self.started = false;
                self.fail(error);
            }
            event => tracing::trace!(?event, "ignoring event for stale utterance"),
        }
    }

    fn fail(&mut self, error: VoiceError) {
        tracing::error!(
            kind = %error.kind,
            timestamp = %error.timestamp,
            "synthesis error: {}",
            error.message
        );
        self.set_state(SynthesisState::Error);
        self.emit(SynthesisEvent::Error(error));
    }

    fn set_state(&mut self, state: SynthesisState) {
        if !self.is_alive() || self.state == state {
            return;
        }
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(SynthesisEvent::StateChanged(state));
    }

    fn emit(&self, event: SynthesisEvent) {
        if self.is_alive() {
            let _ = self.events.send(event);
        }
    }
}
