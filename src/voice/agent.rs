//! Turn-taking voice agent
//!
//! Couples a continuous recognition session with the [`SynthesisQueue`]:
//! listen until the user falls silent, hand the transcript to the caller,
//! speak the caller's response, then listen again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::classify::{VoiceError, classify};
use super::platform::{RecognitionConfig, RecognitionEvent, SpeechInput};
use super::sleep_until_deadline;
use super::synthesis::{SynthesisEvent, SynthesisQueue};
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Silence after a final fragment that ends the user's turn
pub const DEFAULT_SILENCE_THRESHOLD: Duration = Duration::from_millis(800);

/// Pause between the end of a spoken response and listening again
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Where the agent is in the conversation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentPhase {
    #[default]
    Idle,
    Listening,
    /// Waiting for the caller to respond to a transcript
    Thinking,
    Speaking,
}

/// Event delivered to the agent owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    PhaseChanged(AgentPhase),
    /// Provisional text while the user is still talking
    InterimTranscript(String),
    /// The user's completed turn
    Transcript(String),
    /// The spoken response finished playing
    ResponseFinished,
    Error(VoiceError),
}

/// Point-in-time view of the agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSnapshot {
    pub phase: AgentPhase,
    pub transcript: String,
    pub response: String,
}

/// Options for the voice agent
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub language: String,
    pub silence_threshold: Duration,
    pub restart_delay: Duration,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

impl AgentOptions {
    /// Build options from the tuning configuration
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            language: config.language.clone(),
            silence_threshold: config.silence_threshold,
            restart_delay: config.agent_restart_delay,
        }
    }
}

enum Command {
    StartListening(oneshot::Sender<std::result::Result<(), VoiceError>>),
    StopListening(oneshot::Sender<()>),
    Respond(String, oneshot::Sender<std::result::Result<(), VoiceError>>),
    Reset(oneshot::Sender<()>),
    Dispose,
}

/// Handle to a voice agent
///
/// Must be created inside a tokio runtime.
pub struct VoiceAgent {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<AgentSnapshot>,
    alive: Arc<AtomicBool>,
}

impl VoiceAgent {
    /// Create an agent over `input` and `synthesis`
    ///
    /// The agent takes ownership of the queue and its event receiver.
    #[must_use]
    pub fn with_receiver(
        input: Arc<dyn SpeechInput>,
        synthesis: (SynthesisQueue, mpsc::UnboundedReceiver<SynthesisEvent>),
        options: AgentOptions,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(AgentSnapshot::default());
        let alive = Arc::new(AtomicBool::new(true));
        let (synthesis, synthesis_rx) = synthesis;

        let task = AgentTask {
            input,
            synthesis,
            synthesis_rx,
            options,
            commands: command_rx,
            platform_rx,
            platform_tx,
            events: event_tx,
            snapshot: snapshot_tx,
            alive: Arc::clone(&alive),
            phase: AgentPhase::Idle,
            listening: false,
            transcript: String::new(),
            response: String::new(),
            silence_at: None,
            restart_at: None,
        };
        tokio::spawn(task.run());

        let agent = Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            alive,
        };
        (agent, event_rx)
    }

    /// Begin listening for the user's turn
    ///
    /// # Errors
    ///
    /// Returns [`Error::Voice`] when recognition is unsupported or fails to
    /// start
    pub async fn start_listening(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::StartListening(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(())
    }

    /// Stop listening without finalizing the turn
    pub async fn stop_listening(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::StopListening(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Speak the response to the last transcript
    ///
    /// Listening resumes automatically once playback finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Voice`] when synthesis fails to start
    pub async fn respond(&self, text: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Respond(text.into(), tx))?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(())
    }

    /// Stop listening and speaking and clear the conversation state
    pub async fn reset(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Reset(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Tear the agent down; later platform events are ignored
    pub fn dispose(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Dispose);
            tracing::debug!("voice agent disposed");
        }
    }

    #[must_use]
    pub fn phase(&self) -> AgentPhase {
        self.snapshot.borrow().phase
    }

    #[must_use]
    pub fn snapshot(&self) -> AgentSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AgentSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

impl Drop for VoiceAgent {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct AgentTask {
    input: Arc<dyn SpeechInput>,
    synthesis: SynthesisQueue,
    synthesis_rx: mpsc::UnboundedReceiver<SynthesisEvent>,
    options: AgentOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    platform_rx: mpsc::UnboundedReceiver<RecognitionEvent>,
    platform_tx: mpsc::UnboundedSender<RecognitionEvent>,
    events: mpsc::UnboundedSender<AgentEvent>,
    snapshot: watch::Sender<AgentSnapshot>,
    alive: Arc<AtomicBool>,
    phase: AgentPhase,
    /// Platform recognition session is running
    listening: bool,
    transcript: String,
    response: String,
    silence_at: Option<Instant>,
    restart_at: Option<Instant>,
}

impl AgentTask {
    async fn run(mut self) {
        loop {
            let silence_at = self.silence_at;
            let restart_at = self.restart_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispose) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.platform_rx.recv() => self.handle_recognition(event),
                Some(event) = self.synthesis_rx.recv() => self.handle_synthesis(event),
                () = sleep_until_deadline(silence_at) => {
                    self.silence_at = None;
                    self.finish_turn();
                }
                () = sleep_until_deadline(restart_at) => {
                    self.restart_at = None;
                    if self.phase != AgentPhase::Idle {
                        // Failures are reported as events
                        let _ = self.begin_listening();
                    }
                }
            }
        }

        self.silence_at = None;
        self.restart_at = None;
        if self.listening {
            self.input.abort();
        }
        self.synthesis.dispose();
        self.platform_rx.close();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartListening(reply) => {
                self.restart_at = None;
                let _ = reply.send(self.begin_listening());
            }
            Command::StopListening(reply) => {
                self.stop_listening();
                if self.phase == AgentPhase::Listening {
                    self.set_phase(AgentPhase::Idle);
                }
                let _ = reply.send(());
            }
            Command::Respond(text, reply) => {
                let result = self.respond(text).await;
                let _ = reply.send(result);
            }
            Command::Reset(reply) => {
                self.reset().await;
                let _ = reply.send(());
            }
            Command::Dispose => {}
        }
    }

    fn begin_listening(&mut self) -> std::result::Result<(), VoiceError> {
        if self.listening {
            return Ok(());
        }

        if !self.input.is_available() {
            let error =
                VoiceError::not_supported("Speech recognition is not supported in this browser.");
            self.fail(error.clone());
            return Err(error);
        }

        let config = RecognitionConfig {
            continuous: true,
            interim_results: true,
            language: self.options.language.clone(),
            max_alternatives: 1,
        };

        if let Err(e) = self.input.start(&config, self.platform_tx.clone()) {
            let error = classify("aborted", &e.to_string());
            self.fail(error.clone());
            return Err(error);
        }

        self.listening = true;
        self.transcript.clear();
        self.silence_at = None;
        tracing::debug!("agent listening");
        self.set_phase(AgentPhase::Listening);
        Ok(())
    }

    fn stop_listening(&mut self) {
        self.silence_at = None;
        if self.listening {
            self.input.stop();
            self.listening = false;
            // Late callbacks from the stopped session land on the old receiver
            let (tx, rx) = mpsc::unbounded_channel();
            self.platform_tx = tx;
            self.platform_rx = rx;
        }
    }

    async fn respond(&mut self, text: String) -> std::result::Result<(), VoiceError> {
        self.stop_listening();
        self.restart_at = None;
        self.response.clone_from(&text);
        self.set_phase(AgentPhase::Speaking);

        if text.trim().is_empty() {
            // Nothing to play, so the turn is already over
            self.finish_response();
            return Ok(());
        }

        match self.synthesis.speak(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let error = match e {
                    Error::Voice(error) => error,
                    other => VoiceError::synthesis_failed(other.to_string()),
                };
                self.set_phase(AgentPhase::Idle);
                self.emit(AgentEvent::Error(error.clone()));
                Err(error)
            }
        }
    }

    fn finish_response(&mut self) {
        tracing::debug!(
            delay_ms = self.options.restart_delay.as_millis(),
            "response finished, resuming listening"
        );
        self.emit(AgentEvent::ResponseFinished);
        self.restart_at = Some(Instant::now() + self.options.restart_delay);
    }

    async fn reset(&mut self) {
        self.stop_listening();
        self.restart_at = None;
        self.synthesis.stop().await;
        self.transcript.clear();
        self.response.clear();
        tracing::debug!("agent reset");
        self.set_phase(AgentPhase::Idle);
        self.publish();
    }

    fn handle_recognition(&mut self, event: RecognitionEvent) {
        if !self.is_alive() {
            return;
        }

        match event {
            RecognitionEvent::Start => {}
            RecognitionEvent::Result {
                transcript,
                is_final,
                ..
            } => {
                if !self.listening {
                    return;
                }
                if is_final {
                    let fragment = transcript.trim();
                    if !fragment.is_empty() {
                        if !self.transcript.is_empty() {
                            self.transcript.push(' ');
                        }
                        self.transcript.push_str(fragment);
                    }
                    self.silence_at = Some(Instant::now() + self.options.silence_threshold);
                    self.publish();
                } else {
                    // Still talking: push the pending deadline back
                    if self.silence_at.is_some() {
                        self.silence_at = Some(Instant::now() + self.options.silence_threshold);
                    }
                    self.emit(AgentEvent::InterimTranscript(transcript));
                }
            }
            RecognitionEvent::End => {
                let was_listening = std::mem::replace(&mut self.listening, false);
                // The platform ended a turn we did not finish; pick it back up
                if was_listening && self.phase == AgentPhase::Listening {
                    if self.silence_at.is_some() {
                        self.silence_at = None;
                        self.finish_turn();
                    } else {
                        self.restart_at = Some(Instant::now() + self.options.restart_delay);
                    }
                }
            }
            RecognitionEvent::Error { code, message } => {
                if !self.listening {
                    return;
                }
                let error = classify(&code, &message);
                self.stop_listening();
                self.fail(error);
            }
        }
    }

    fn handle_synthesis(&mut self, event: SynthesisEvent) {
        if !self.is_alive() {
            return;
        }

        match event {
            SynthesisEvent::Finished if self.phase == AgentPhase::Speaking => {
                self.finish_response();
            }
            SynthesisEvent::Error(error) if self.phase == AgentPhase::Speaking => self.fail(error),
            _ => {}
        }
    }

    fn finish_turn(&mut self) {
        self.stop_listening();
        let text = self.transcript.trim().to_string();
        if text.is_empty() {
            self.set_phase(AgentPhase::Idle);
            return;
        }

        tracing::info!(chars = text.chars().count(), "user turn complete");
        self.set_phase(AgentPhase::Thinking);
        self.emit(AgentEvent::Transcript(text));
    }

    fn fail(&mut self, error: VoiceError) {
        tracing::error!(
            kind = %error.kind,
            timestamp = %error.timestamp,
            "voice agent error: {}",
            error.message
        );
        self.set_phase(AgentPhase::Idle);
        self.emit(AgentEvent::Error(error));
    }

    fn set_phase(&mut self, phase: AgentPhase) {
        if !self.is_alive() {
            return;
        }
        let changed = self.phase != phase;
        self.phase = phase;
        self.publish();
        if changed {
            self.emit(AgentEvent::PhaseChanged(phase));
        }
    }

    fn publish(&self) {
        if !self.is_alive() {
            return;
        }
        self.snapshot.send_replace(AgentSnapshot {
            phase: self.phase,
            transcript: self.transcript.clone(),
            response: self.response.clone(),
        });
    }

    fn emit(&self, event: AgentEvent) {
        if self.is_alive() {
            let _ = self.events.send(event);
        }
    }
}
