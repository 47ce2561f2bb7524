//! Shared test utilities
//!
//! Scriptable stand-ins for the platform speech capabilities. Each fake
//! records what the voice layer asked of it and lets the test push platform
//! events back through the sink it was handed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use credora_voice::voice::{
    EventSink, MediaStream, PermissionGate, PermissionOutcome, RecognitionConfig,
    RecognitionEvent, SpeechInput, SpeechOutput, Utterance, UtteranceEvent, VoiceInfo,
};
use credora_voice::{Error, Result};

/// Let spawned tasks drain their queues without advancing time
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time, then let timers fire
pub async fn advance_ms(ms: u64) {
    tokio::time::advance(std::time::Duration::from_millis(ms)).await;
    settle().await;
}

/// Collect every event currently buffered on `rx`
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Scriptable speech recognizer
#[derive(Default)]
pub struct FakeSpeechInput {
    unavailable: AtomicBool,
    fail_start: AtomicBool,
    sink: Mutex<Option<EventSink<RecognitionEvent>>>,
    configs: Mutex<Vec<RecognitionConfig>>,
    stops: AtomicUsize,
    aborts: AtomicUsize,
}

impl FakeSpeechInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unavailable() -> Arc<Self> {
        let input = Self::default();
        input.unavailable.store(true, Ordering::SeqCst);
        Arc::new(input)
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.configs.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<RecognitionConfig> {
        self.configs.lock().unwrap().last().cloned()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Push an event; false once the consumer has gone away
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    pub fn interim(&self, text: &str) -> bool {
        self.emit(RecognitionEvent::Result {
            transcript: text.to_string(),
            is_final: false,
            confidence: 0.5,
        })
    }

    pub fn final_result(&self, text: &str) -> bool {
        self.emit(RecognitionEvent::Result {
            transcript: text.to_string(),
            is_final: true,
            confidence: 0.9,
        })
    }

    pub fn error(&self, code: &str) -> bool {
        self.emit(RecognitionEvent::Error {
            code: code.to_string(),
            message: String::new(),
        })
    }

    pub fn end(&self) -> bool {
        self.emit(RecognitionEvent::End)
    }
}

impl SpeechInput for FakeSpeechInput {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn start(&self, config: &RecognitionConfig, events: EventSink<RecognitionEvent>) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Platform("recognizer already started".to_string()));
        }
        self.configs.lock().unwrap().push(config.clone());
        let _ = events.send(RecognitionEvent::Start);
        *self.sink.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable speech synthesizer
#[derive(Default)]
pub struct FakeSpeechOutput {
    unavailable: AtomicBool,
    fail_speak: AtomicBool,
    sink: Mutex<Option<EventSink<UtteranceEvent>>>,
    spoken: Mutex<Vec<Utterance>>,
    voices: Mutex<Vec<VoiceInfo>>,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeSpeechOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unavailable() -> Arc<Self> {
        let output = Self::default();
        output.unavailable.store(true, Ordering::SeqCst);
        Arc::new(output)
    }

    pub fn set_fail_speak(&self, fail: bool) {
        self.fail_speak.store(fail, Ordering::SeqCst);
    }

    pub fn set_voices(&self, voices: Vec<VoiceInfo>) {
        *self.voices.lock().unwrap() = voices;
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    /// Id of the utterance most recently handed to the engine
    pub fn current_id(&self) -> u64 {
        self.spoken.lock().unwrap().last().map(|u| u.id).expect("nothing spoken")
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: UtteranceEvent) -> bool {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    pub fn start_current(&self) {
        let id = self.current_id();
        self.emit(UtteranceEvent::Start { id });
    }

    pub fn end_current(&self) {
        let id = self.current_id();
        self.emit(UtteranceEvent::End { id });
    }

    pub fn fail_current(&self, code: &str) {
        let id = self.current_id();
        self.emit(UtteranceEvent::Error {
            id,
            code: code.to_string(),
        });
    }
}

impl SpeechOutput for FakeSpeechOutput {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn speak(&self, utterance: &Utterance, events: EventSink<UtteranceEvent>) -> Result<()> {
        if self.fail_speak.load(Ordering::SeqCst) {
            return Err(Error::Platform("engine rejected utterance".to_string()));
        }
        self.spoken.lock().unwrap().push(utterance.clone());
        *self.sink.lock().unwrap() = Some(events);
        Ok(())
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.lock().unwrap().clone()
    }
}

/// Microphone permission prompt with a fixed answer
pub struct FakePermission {
    grant: bool,
    requests: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl FakePermission {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            grant: true,
            requests: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            grant: false,
            requests: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Streams released by the session after a grant
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FakeStream(Arc<AtomicUsize>);

impl MediaStream for FakeStream {
    fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PermissionGate for FakePermission {
    async fn request_microphone(&self) -> PermissionOutcome {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.grant {
            PermissionOutcome::Granted(Box::new(FakeStream(Arc::clone(&self.released))))
        } else {
            PermissionOutcome::Denied {
                reason: "Permission dismissed".to_string(),
            }
        }
    }
}

pub fn voice(id: &str, default: bool) -> VoiceInfo {
    VoiceInfo {
        id: id.to_string(),
        name: id.to_string(),
        language: "en-US".to_string(),
        default,
    }
}
