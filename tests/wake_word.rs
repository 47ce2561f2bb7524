//! Wake word detector integration tests

use credora_voice::voice::{VoiceErrorKind, WakeEvent, WakeWordDetector, WakeWordOptions};

mod common;
use common::{FakeSpeechInput, advance_ms, drain, settle};

async fn enabled_detector(
    input: &std::sync::Arc<FakeSpeechInput>,
) -> (
    WakeWordDetector,
    tokio::sync::mpsc::UnboundedReceiver<WakeEvent>,
) {
    let (detector, events) =
        WakeWordDetector::with_receiver(input.clone(), WakeWordOptions::default());
    detector.set_enabled(true).await;
    settle().await;
    (detector, events)
}

fn detections(events: Vec<WakeEvent>) -> Vec<String> {
    events
        .into_iter()
        .filter_map(|e| match e {
            WakeEvent::Detected { phrase, .. } => Some(phrase),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_detector_starts_disabled() {
    let input = FakeSpeechInput::new();
    let (detector, _events) =
        WakeWordDetector::with_receiver(input.clone(), WakeWordOptions::default());

    detector.start().await;
    assert_eq!(input.starts(), 0);
    assert!(!detector.status().enabled);
    assert!(!detector.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_enable_starts_continuous_listening() {
    let input = FakeSpeechInput::new();
    let (detector, mut events) = enabled_detector(&input).await;

    assert_eq!(input.starts(), 1);
    assert!(detector.is_listening());
    let config = input.last_config().expect("started");
    assert!(config.continuous);
    assert!(config.interim_results);
    assert!(drain(&mut events).contains(&WakeEvent::ListeningChanged(true)));
}

#[tokio::test(start_paused = true)]
async fn test_detection_and_cooldown() {
    let input = FakeSpeechInput::new();
    let (detector, mut events) = enabled_detector(&input).await;
    drain(&mut events);

    input.interim("Hey Credora show my revenue");
    settle().await;
    assert_eq!(detections(drain(&mut events)), vec!["hey credora".to_string()]);
    assert_eq!(detector.status().last_detected.as_deref(), Some("hey credora"));
    assert_eq!(input.stops(), 1, "session stopped after detection");

    // Suppressed while cooling down
    input.final_result("hey credora again");
    settle().await;
    assert!(detections(drain(&mut events)).is_empty());

    // Restart waits out the cooldown plus the normal restart delay
    input.end();
    settle().await;
    advance_ms(3499).await;
    assert_eq!(input.starts(), 1);
    advance_ms(1).await;
    assert_eq!(input.starts(), 2);

    input.interim("ok credora");
    settle().await;
    assert_eq!(detections(drain(&mut events)), vec!["ok credora".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_speech_is_ignored() {
    let input = FakeSpeechInput::new();
    let (_detector, mut events) = enabled_detector(&input).await;

    input.final_result("the quarterly report is ready");
    settle().await;
    assert!(detections(drain(&mut events)).is_empty());
    assert_eq!(input.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_normal_end() {
    let input = FakeSpeechInput::new();
    let (detector, _events) = enabled_detector(&input).await;

    input.end();
    settle().await;
    assert!(!detector.is_listening());

    advance_ms(499).await;
    assert_eq!(input.starts(), 1);
    advance_ms(1).await;
    assert_eq!(input.starts(), 2);
    assert!(detector.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_transient_error_waits_longer() {
    for code in ["no-speech", "aborted", "audio-capture"] {
        let input = FakeSpeechInput::new();
        let (_detector, _events) = enabled_detector(&input).await;

        input.error(code);
        input.end();
        settle().await;

        advance_ms(999).await;
        assert_eq!(input.starts(), 1, "{code} restarted early");
        advance_ms(1).await;
        assert_eq!(input.starts(), 2, "{code} did not restart");
    }
}

#[tokio::test(start_paused = true)]
async fn test_network_error_uses_normal_delay() {
    let input = FakeSpeechInput::new();
    let (_detector, mut events) = enabled_detector(&input).await;
    drain(&mut events);

    input.error("network");
    input.end();
    settle().await;

    let errors: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            WakeEvent::Error(error) => Some(error.kind),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![VoiceErrorKind::Network]);

    advance_ms(500).await;
    assert_eq!(input.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_permission_error_halts_until_reenabled() {
    let input = FakeSpeechInput::new();
    let (detector, _events) = enabled_detector(&input).await;

    input.error("not-allowed");
    input.end();
    settle().await;

    advance_ms(10_000).await;
    assert_eq!(input.starts(), 1);
    assert!(detector.status().halted);

    detector.set_enabled(false).await;
    detector.set_enabled(true).await;
    assert_eq!(input.starts(), 2);
    assert!(!detector.status().halted);
}

#[tokio::test(start_paused = true)]
async fn test_disable_stops_and_cancels_restart() {
    let input = FakeSpeechInput::new();
    let (detector, mut events) = enabled_detector(&input).await;
    drain(&mut events);

    detector.set_enabled(false).await;
    assert_eq!(input.stops(), 1);
    assert!(drain(&mut events).contains(&WakeEvent::ListeningChanged(false)));

    input.end();
    settle().await;
    advance_ms(5_000).await;
    assert_eq!(input.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_not_undone_by_platform_end() {
    let input = FakeSpeechInput::new();
    let (detector, mut events) = enabled_detector(&input).await;
    drain(&mut events);

    detector.stop().await;
    assert_eq!(input.stops(), 1);
    assert!(!detector.is_listening());

    input.end();
    input.final_result("hey credora");
    settle().await;
    advance_ms(600).await;

    assert_eq!(input.starts(), 1);
    assert!(!detector.is_listening());
    assert!(detections(drain(&mut events)).is_empty());

    // An explicit start picks listening back up
    detector.start().await;
    assert_eq!(input.starts(), 2);
    assert!(detector.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_schedules_error_restart() {
    let input = FakeSpeechInput::new();
    input.set_fail_start(true);
    let (detector, mut events) =
        WakeWordDetector::with_receiver(input.clone(), WakeWordOptions::default());
    detector.set_enabled(true).await;

    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, WakeEvent::Error(error) if error.kind == VoiceErrorKind::Aborted))
    );

    input.set_fail_start(false);
    advance_ms(1000).await;
    assert_eq!(input.starts(), 1);
    assert!(detector.is_listening());
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_host_halts() {
    let input = FakeSpeechInput::unavailable();
    let (detector, mut events) =
        WakeWordDetector::with_receiver(input.clone(), WakeWordOptions::default());
    detector.set_enabled(true).await;

    assert!(detector.status().halted);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, WakeEvent::Error(error) if error.kind == VoiceErrorKind::NotSupported))
    );
}

#[tokio::test(start_paused = true)]
async fn test_custom_phrases_are_normalized() {
    let input = FakeSpeechInput::new();
    let options = WakeWordOptions {
        phrases: vec!["  Hello LEDGER ".to_string(), String::new()],
        ..WakeWordOptions::default()
    };
    let (detector, mut events) = WakeWordDetector::with_receiver(input.clone(), options);
    detector.set_enabled(true).await;

    input.interim("hello ledger open invoices");
    settle().await;
    assert_eq!(detections(drain(&mut events)), vec!["hello ledger".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_aborts_listening() {
    let input = FakeSpeechInput::new();
    let (detector, mut events) = enabled_detector(&input).await;
    drain(&mut events);

    detector.dispose();
    settle().await;

    assert_eq!(input.aborts(), 1);
    assert!(!input.interim("hey credora"));
    assert!(drain(&mut events).is_empty());
}
