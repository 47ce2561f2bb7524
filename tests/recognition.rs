//! Recognition session integration tests
//!
//! Drives sessions against a scripted recognizer with paused time so the
//! retry schedule can be checked to the millisecond.

use credora_voice::Error;
use credora_voice::voice::{
    RecognitionOptions, RecognitionSession, RecognitionState, SessionEvent, VoiceErrorKind,
};
use tokio_test::{assert_err, assert_ok};

mod common;
use common::{FakePermission, FakeSpeechInput, advance_ms, drain, settle};

fn session(
    input: &std::sync::Arc<FakeSpeechInput>,
    options: RecognitionOptions,
) -> (
    RecognitionSession,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) {
    RecognitionSession::with_receiver(input.clone(), FakePermission::granting(), options)
}

#[tokio::test(start_paused = true)]
async fn test_start_requests_permission_and_listens() {
    let input = FakeSpeechInput::new();
    let permission = FakePermission::granting();
    let (session, mut events) = RecognitionSession::with_receiver(
        input.clone(),
        permission.clone(),
        RecognitionOptions::default(),
    );

    assert_ok!(session.start().await);

    assert_eq!(permission.requests(), 1);
    assert_eq!(permission.released(), 1, "probe stream must be released");
    assert_eq!(session.state(), RecognitionState::Listening);

    let config = input.last_config().expect("recognizer started");
    assert!(!config.continuous);
    assert!(config.interim_results);
    assert_eq!(config.language, "en-US");
    assert_eq!(config.max_alternatives, 1);

    let states: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            RecognitionState::RequestingPermission,
            RecognitionState::Listening
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_start_while_listening_is_noop() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());

    assert_ok!(session.start().await);
    assert_ok!(session.start().await);
    assert_eq!(input.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_retry_with_backoff_then_stop() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    for (attempt, delay) in [100_u64, 500, 1000].into_iter().enumerate() {
        input.error("network");
        settle().await;
        assert_eq!(session.state(), RecognitionState::Error);

        advance_ms(delay - 1).await;
        assert_eq!(input.starts(), attempt + 1, "restarted early at attempt {attempt}");

        advance_ms(1).await;
        assert_eq!(input.starts(), attempt + 2, "no restart at attempt {attempt}");
        assert_eq!(session.state(), RecognitionState::Listening);
    }

    // Fourth failure exhausts the budget
    input.error("network");
    settle().await;
    advance_ms(10_000).await;
    assert_eq!(input.starts(), 4);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, RecognitionState::Error);
    assert_eq!(snapshot.retry_count, 3);
    assert_eq!(
        snapshot.error.map(|e| e.kind),
        Some(VoiceErrorKind::Network)
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_speech_and_aborted_also_retry() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    input.error("no-speech");
    settle().await;
    advance_ms(100).await;
    assert_eq!(input.starts(), 2);

    input.error("aborted");
    settle().await;
    advance_ms(500).await;
    assert_eq!(input.starts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_audio_capture_error_is_not_retried() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    input.error("audio-capture");
    settle().await;
    advance_ms(5_000).await;

    assert_eq!(input.starts(), 1);
    let error = session.snapshot().error.expect("error recorded");
    assert_eq!(error.kind, VoiceErrorKind::AudioCapture);
    assert!(error.recoverable);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_never_retries() {
    let input = FakeSpeechInput::new();
    let (session, mut events) = RecognitionSession::with_receiver(
        input.clone(),
        FakePermission::denying(),
        RecognitionOptions::default(),
    );

    let err = assert_err!(session.start().await);
    let voice_error = err.as_voice().expect("classified error");
    assert_eq!(voice_error.kind, VoiceErrorKind::PermissionDenied);
    assert!(!voice_error.recoverable);

    advance_ms(10_000).await;
    assert_eq!(input.starts(), 0);
    assert_eq!(session.state(), RecognitionState::Error);

    let errors = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_platform_not_allowed_halts_retries() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    input.error("not-allowed");
    settle().await;
    advance_ms(10_000).await;

    assert_eq!(input.starts(), 1);
    assert_eq!(
        session.snapshot().error.map(|e| e.kind),
        Some(VoiceErrorKind::PermissionDenied)
    );
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_host_fails_fast() {
    let input = FakeSpeechInput::unavailable();
    let permission = FakePermission::granting();
    let (session, _events) = RecognitionSession::with_receiver(
        input.clone(),
        permission.clone(),
        RecognitionOptions::default(),
    );

    let err = assert_err!(session.start().await);
    let voice_error = err.as_voice().expect("classified error");
    assert_eq!(voice_error.kind, VoiceErrorKind::NotSupported);
    assert!(!voice_error.recoverable);
    assert_eq!(permission.requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clear_error_resets_retry_budget() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    for delay in [100_u64, 500, 1000] {
        input.error("network");
        settle().await;
        advance_ms(delay).await;
    }
    input.error("network");
    settle().await;
    advance_ms(10_000).await;
    assert_eq!(input.starts(), 4);
    assert_eq!(session.retry_count(), 3);

    session.clear_error().await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, RecognitionState::Idle);
    assert_eq!(snapshot.retry_count, 0);
    assert!(snapshot.error.is_none());

    // A fresh failure starts the schedule over at the first delay
    assert_ok!(session.start().await);
    assert_eq!(input.starts(), 5);
    input.error("network");
    settle().await;
    assert_eq!(session.retry_count(), 1);

    advance_ms(99).await;
    assert_eq!(input.starts(), 5);
    advance_ms(1).await;
    assert_eq!(input.starts(), 6);
    assert_eq!(session.state(), RecognitionState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_clear_error_cancels_pending_retry() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    input.error("network");
    settle().await;
    session.clear_error().await;

    advance_ms(1_000).await;
    assert_eq!(input.starts(), 1);
    assert_eq!(session.state(), RecognitionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_after_stop_is_ignored() {
    let input = FakeSpeechInput::new();
    let (session, mut events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);
    session.stop().await;
    drain(&mut events);

    input.final_result("late words");
    input.end();
    settle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, RecognitionState::Idle);
    assert!(snapshot.transcript.is_empty());
    assert!(drain(&mut events).is_empty());

    // The next start listens on a fresh channel
    assert_ok!(session.start().await);
    input.final_result("fresh words");
    settle().await;
    assert_eq!(session.transcript(), "fresh words");
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_retry() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    input.error("network");
    settle().await;
    session.stop().await;

    advance_ms(1_000).await;
    assert_eq!(input.starts(), 1);
    assert_eq!(session.state(), RecognitionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_transcripts_accumulate() {
    let input = FakeSpeechInput::new();
    let (session, mut events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);
    drain(&mut events);

    input.interim("what is");
    settle().await;
    assert_eq!(session.state(), RecognitionState::Listening);

    input.final_result("what is my burn rate");
    settle().await;
    assert_eq!(session.state(), RecognitionState::Processing);
    assert_eq!(session.transcript(), "what is my burn rate");

    let transcripts: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Transcript(t) => Some((t.text, t.is_final)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transcripts,
        vec![
            ("what is".to_string(), false),
            ("what is my burn rate".to_string(), true)
        ]
    );

    input.end();
    settle().await;
    assert_eq!(session.state(), RecognitionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_session_restarts_after_end() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default().continuous(true));
    assert_ok!(session.start().await);
    assert!(input.last_config().is_some_and(|c| c.continuous));

    input.final_result("first");
    settle().await;
    input.end();
    settle().await;

    advance_ms(100).await;
    assert_eq!(input.starts(), 2);
    assert_eq!(session.state(), RecognitionState::Listening);
    assert_eq!(session.snapshot().transcript, "first");
}

#[tokio::test(start_paused = true)]
async fn test_platform_start_failure_is_reported() {
    let input = FakeSpeechInput::new();
    input.set_fail_start(true);
    let (session, _events) = session(&input, RecognitionOptions::default());

    let err = assert_err!(session.start().await);
    assert_eq!(
        err.as_voice().map(|e| e.kind),
        Some(VoiceErrorKind::Aborted)
    );

    // Aborted is transient; once the platform recovers the retry succeeds
    input.set_fail_start(false);
    advance_ms(100).await;
    assert_eq!(session.state(), RecognitionState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_detaches_platform() {
    let input = FakeSpeechInput::new();
    let (session, mut events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);
    drain(&mut events);

    session.dispose();
    settle().await;

    assert!(session.is_disposed());
    assert_eq!(input.aborts(), 1);
    assert!(!input.final_result("too late"), "receiver should be closed");
    assert!(drain(&mut events).is_empty());
    assert!(matches!(session.start().await, Err(Error::SessionClosed)));

    // Disposing twice is harmless
    session.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_drop_disposes_session() {
    let input = FakeSpeechInput::new();
    let (session, _events) = session(&input, RecognitionOptions::default());
    assert_ok!(session.start().await);

    drop(session);
    settle().await;
    assert_eq!(input.aborts(), 1);
}
