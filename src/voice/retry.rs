//! Retry schedule shared by recognition sessions

use std::time::Duration;

use super::classify::{VoiceError, VoiceErrorKind};

/// Maximum automatic retries before an error is left standing
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Backoff schedule in milliseconds, indexed by attempt
pub const RETRY_DELAYS_MS: [u64; 3] = [100, 500, 1000];

/// Retry policy for recoverable recognition failures
///
/// Controls how many times a session restarts itself and how long it waits
/// before each attempt. The last delay repeats for attempts past the end of
/// the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Delay before each attempt
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            delays: RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` retries
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt` (zero-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(attempt).map_or(last, |a| a.min(last));
        self.delays[index]
    }
}

/// Delay before retry number `attempt` using the default schedule
#[must_use]
pub fn retry_delay(attempt: u32) -> Duration {
    let index = usize::try_from(attempt).map_or(2, |a| a.min(2));
    Duration::from_millis(RETRY_DELAYS_MS[index])
}

/// Whether an error is worth restarting the session for
///
/// Only recoverable transient failures qualify.
#[must_use]
pub const fn should_retry(error: &VoiceError) -> bool {
    error.recoverable
        && matches!(
            error.kind,
            VoiceErrorKind::Network | VoiceErrorKind::Aborted | VoiceErrorKind::NoSpeech
        )
}
