//! Foreground speech-to-text sessions
//!
//! A [`RecognitionSession`] owns one on-demand recognition session: it asks
//! for microphone permission, drives the platform [`SpeechInput`], delivers
//! transcripts, and restarts itself with backoff after transient failures.
//!
//! All mutable state lives in a spawned task; the handle only sends
//! commands and reads a `watch` snapshot. Disposing the handle ends the task
//! and drops the platform event receiver, so late platform callbacks have
//! nowhere to land.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::classify::{VoiceError, VoiceErrorKind, classify};
use super::platform::{
    PermissionGate, PermissionOutcome, RecognitionConfig, RecognitionEvent, SpeechInput,
};
use super::retry::{RetryPolicy, should_retry};
use super::sleep_until_deadline;
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Lifecycle state of a recognition session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionState {
    #[default]
    Idle,
    RequestingPermission,
    Listening,
    Processing,
    Error,
}

/// A recognized piece of speech
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    /// Engine confidence in `[0, 1]`
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to the session owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(RecognitionState),
    Transcript(Transcript),
    Error(VoiceError),
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: RecognitionState,
    pub error: Option<VoiceError>,
    /// Final text accumulated since the last start
    pub transcript: String,
    /// Retries consumed since the last start or `clear_error`
    pub retry_count: u32,
}

/// Options for a foreground session
#[derive(Debug, Clone)]
pub struct RecognitionOptions {
    pub continuous: bool,
    pub interim_results: bool,
    pub language: String,
    pub max_alternatives: u32,
    pub retry: RetryPolicy,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            continuous: false,
            interim_results: true,
            language: "en-US".to_string(),
            max_alternatives: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl RecognitionOptions {
    /// Build options from the tuning configuration
    #[must_use]
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self {
            language: config.language.clone(),
            retry: config.retry.clone(),
            ..Self::default()
        }
    }

    /// Enable or disable continuous mode
    #[must_use]
    pub const fn continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    fn platform_config(&self) -> RecognitionConfig {
        RecognitionConfig {
            continuous: self.continuous,
            interim_results: self.interim_results,
            language: self.language.clone(),
            max_alternatives: self.max_alternatives,
        }
    }
}

enum Command {
    Start(oneshot::Sender<std::result::Result<(), VoiceError>>),
    Stop(oneshot::Sender<()>),
    ClearError(oneshot::Sender<()>),
    Dispose,
}

/// Handle to a foreground recognition session
///
/// Must be created inside a tokio runtime.
pub struct RecognitionSession {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RecognitionSession {
    /// Create a session and the receiver for its events
    #[must_use]
    pub fn with_receiver(
        input: Arc<dyn SpeechInput>,
        permission: Arc<dyn PermissionGate>,
        options: RecognitionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (platform_tx, platform_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let alive = Arc::new(AtomicBool::new(true));

        let task = SessionTask {
            input,
            permission,
            options,
            commands: command_rx,
            platform_rx,
            platform_tx,
            events: event_tx,
            snapshot: snapshot_tx,
            alive: Arc::clone(&alive),
            state: RecognitionState::Idle,
            error: None,
            transcript: String::new(),
            retry_count: 0,
            retry_at: None,
            platform_active: false,
        };

        let session = Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            alive,
            task: tokio::spawn(task.run()),
        };

        (session, event_rx)
    }

    /// Request permission and start listening
    ///
    /// # Errors
    ///
    /// Returns [`Error::Voice`] when recognition is unsupported or the
    /// microphone is denied, and [`Error::SessionClosed`] after disposal
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        Ok(())
    }

    /// Stop listening and cancel any pending retry
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Clear a standing error and reset the retry counter
    pub async fn clear_error(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::ClearError(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Tear the session down; later platform events are ignored
    pub fn dispose(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Dispose);
            tracing::debug!("recognition session disposed");
        }
    }

    /// Whether the session has been disposed
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        !self.alive.load(Ordering::SeqCst) || self.task.is_finished()
    }

    #[must_use]
    pub fn state(&self) -> RecognitionState {
        self.snapshot.borrow().state
    }

    /// Standing error, if any
    #[must_use]
    pub fn error(&self) -> Option<VoiceError> {
        self.snapshot.borrow().error.clone()
    }

    /// Final text accumulated since the last start
    #[must_use]
    pub fn transcript(&self) -> String {
        self.snapshot.borrow().transcript.clone()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.snapshot.borrow().retry_count
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        self.commands.send(command).map_err(|_| Error::SessionClosed)
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct SessionTask {
    input: Arc<dyn SpeechInput>,
    permission: Arc<dyn PermissionGate>,
    options: RecognitionOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    platform_rx: mpsc::UnboundedReceiver<RecognitionEvent>,
    platform_tx: mpsc::UnboundedSender<RecognitionEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    alive: Arc<AtomicBool>,
    state: RecognitionState,
    error: Option<VoiceError>,
    transcript: String,
    retry_count: u32,
    retry_at: Option<Instant>,
    platform_active: bool,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispose) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.platform_rx.recv() => self.handle_platform_event(event),
                () = sleep_until_deadline(retry_at) => {
                    self.retry_at = None;
                    self.fire_retry();
                }
            }
        }
        self.teardown();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Command::ClearError(reply) => {
                self.clear_error();
                let _ = reply.send(());
            }
            Command::Dispose => {}
        }
    }

    async fn start(&mut self) -> std::result::Result<(), VoiceError> {
        if matches!(
            self.state,
            RecognitionState::Listening | RecognitionState::Processing
        ) {
            tracing::debug!("recognition already active");
            return Ok(());
        }

        if !self.input.is_available() {
            let error =
                VoiceError::not_supported("Speech recognition is not supported in this browser.");
            self.fail(error.clone());
            return Err(error);
        }

        self.cancel_retry();
        self.set_state(RecognitionState::RequestingPermission);

        match self.permission.request_microphone().await {
            PermissionOutcome::Granted(stream) => {
                // Recognition captures audio itself; the grant is all we need
                stream.release();
            }
            PermissionOutcome::Denied { reason } => {
                let error = classify("not-allowed", &reason);
                self.fail(error.clone());
                return Err(error);
            }
        }

        if !self.is_alive() {
            return Ok(());
        }

        self.transcript.clear();
        self.retry_count = 0;
        self.error = None;
        self.begin_listening()
    }

    fn begin_listening(&mut self) -> std::result::Result<(), VoiceError> {
        let config = self.options.platform_config();
        if let Err(e) = self.input.start(&config, self.platform_tx.clone()) {
            let error = classify("aborted", &e.to_string());
            self.handle_error(error.clone());
            return Err(error);
        }

        self.platform_active = true;
        tracing::info!(
            continuous = config.continuous,
            language = %config.language,
            attempt = self.retry_count,
            "recognition started"
        );
        self.set_state(RecognitionState::Listening);
        Ok(())
    }

    fn stop(&mut self) {
        self.cancel_retry();
        if self.platform_active {
            self.input.stop();
            self.platform_active = false;
        }
        self.detach_platform();
        if self.state != RecognitionState::Idle {
            tracing::info!("recognition stopped");
        }
        self.set_state(RecognitionState::Idle);
    }

    /// Swap in a fresh platform channel
    ///
    /// The stopped recognizer keeps the old sink, so anything it delivers
    /// afterwards is dropped with the old receiver.
    fn detach_platform(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.platform_tx = tx;
        self.platform_rx = rx;
    }

    fn clear_error(&mut self) {
        self.cancel_retry();
        self.error = None;
        self.retry_count = 0;
        if self.state == RecognitionState::Error {
            self.set_state(RecognitionState::Idle);
        } else {
            self.publish();
        }
    }

    fn handle_platform_event(&mut self, event: RecognitionEvent) {
        if !self.is_alive() {
            tracing::trace!(?event, "dropping event for disposed session");
            return;
        }

        match event {
            RecognitionEvent::Start => tracing::debug!("recognition audio started"),
            RecognitionEvent::Result {
                transcript,
                is_final,
                confidence,
            } => {
                if !self.platform_active || self.state == RecognitionState::Idle {
                    tracing::debug!("ignoring result for inactive session");
                    return;
                }
                self.handle_result(transcript, is_final, confidence);
            }
            RecognitionEvent::End => self.handle_end(),
            RecognitionEvent::Error { code, message } => {
                if self.state == RecognitionState::Idle {
                    tracing::debug!(code, "ignoring error for stopped session");
                    return;
                }
                self.handle_error(classify(&code, &message));
            }
        }
    }

    fn handle_result(&mut self, text: String, is_final: bool, confidence: f32) {
        if is_final {
            if !self.transcript.is_empty() {
                self.transcript.push(' ');
            }
            self.transcript.push_str(text.trim());
            tracing::debug!(confidence, "final transcript received");
        }

        self.emit(SessionEvent::Transcript(Transcript {
            text,
            is_final,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }));

        if is_final {
            self.set_state(RecognitionState::Processing);
        } else if self.state == RecognitionState::Processing {
            self.set_state(RecognitionState::Listening);
        } else {
            self.publish();
        }
    }

    fn handle_end(&mut self) {
        self.platform_active = false;
        match self.state {
            RecognitionState::Listening | RecognitionState::Processing
                if self.options.continuous =>
            {
                if !self.schedule_retry("session ended") {
                    self.set_state(RecognitionState::Idle);
                }
            }
            RecognitionState::Listening | RecognitionState::Processing => {
                self.set_state(RecognitionState::Idle);
            }
            _ => {}
        }
    }

    fn handle_error(&mut self, error: VoiceError) {
        self.platform_active = false;
        self.fail(error.clone());

        if error.kind == VoiceErrorKind::PermissionDenied || !should_retry(&error) {
            self.cancel_retry();
            return;
        }

        self.schedule_retry(error.kind.code());
    }

    /// Schedule a restart per the backoff policy
    ///
    /// Returns false once the retry budget is spent.
    fn schedule_retry(&mut self, reason: &str) -> bool {
        if !self.options.retry.allows(self.retry_count) {
            tracing::warn!(
                attempts = self.retry_count,
                reason,
                "recognition retry limit reached"
            );
            return false;
        }

        let delay = self.options.retry.delay_for_attempt(self.retry_count);
        self.retry_count += 1;
        self.retry_at = Some(Instant::now() + delay);
        tracing::info!(
            attempt = self.retry_count,
            delay_ms = delay.as_millis(),
            reason,
            "scheduling recognition restart"
        );
        self.publish();
        true
    }

    fn fire_retry(&mut self) {
        if !self.is_alive() || self.state == RecognitionState::Idle {
            return;
        }
        self.error = None;
        // Failures are reported through handle_error
        let _ = self.begin_listening();
    }

    fn cancel_retry(&mut self) {
        if self.retry_at.take().is_some() {
            tracing::debug!("pending recognition retry cancelled");
        }
    }

    fn fail(&mut self, error: VoiceError) {
        tracing::error!(
            kind = %error.kind,
            recoverable = error.recoverable,
            timestamp = %error.timestamp,
            "recognition error: {}",
            error.message
        );
        self.error = Some(error.clone());
        self.set_state(RecognitionState::Error);
        self.emit(SessionEvent::Error(error));
    }

    fn set_state(&mut self, state: RecognitionState) {
        if !self.is_alive() {
            return;
        }
        let changed = self.state != state;
        self.state = state;
        self.publish();
        if changed {
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn publish(&self) {
        if !self.is_alive() {
            return;
        }
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            error: self.error.clone(),
            transcript: self.transcript.clone(),
            retry_count: self.retry_count,
        });
    }

    fn emit(&self, event: SessionEvent) {
        if self.is_alive() {
            let _ = self.events.send(event);
        }
    }

    fn teardown(&mut self) {
        self.cancel_retry();
        if self.platform_active {
            self.input.abort();
            self.platform_active = false;
        }
        self.platform_rx.close();
    }
}
