//! Pure backoff scheduling for reconnect attempts
//!
//! Delay formula: `min(base * 2^attempt + uniform(0..=1000ms), max)`. Jitter
//! is drawn independently per call so a server restart does not produce a
//! synchronized mass reconnection across clients.

use crate::config::ChannelConfig;
use rand::Rng;
use std::time::Duration;

/// Upper bound of the uniform jitter added to every computed delay, in
/// milliseconds.
pub const JITTER_MS: u64 = 1_000;

/// Compute the delay before the next scheduled reconnect attempt.
///
/// `attempt` is the retry counter value *before* increment; the state machine
/// increments the counter when the timer actually fires.
pub fn retry_delay(attempt: u32, config: &ChannelConfig) -> Duration {
    let exponential = 2u64
        .checked_pow(attempt)
        .and_then(|factor| config.base_delay_ms.checked_mul(factor))
        .unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=JITTER_MS);
    let delay_ms = exponential
        .saturating_add(jitter)
        .min(config.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Decision result for a reconnect evaluation.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule a timer for `delay`, then attempt reconnect number
    /// `attempt + 1`.
    Schedule { attempt: u32, delay: Duration },
    /// The caller closed the channel; automatic reconnection is disabled.
    AbortManualClose,
    /// Retry budget exhausted; the channel transitions to `Failed`.
    AbortBudgetExhausted,
}

/// Decide whether a scheduled reconnect should happen after a non-manual
/// closure. Pure; the state machine owns the counter and the timer.
pub fn evaluate_retry(attempts: u32, config: &ChannelConfig, manual_close: bool) -> RetryDecision {
    if manual_close {
        return RetryDecision::AbortManualClose;
    }
    if attempts >= config.max_reconnect_attempts {
        return RetryDecision::AbortBudgetExhausted;
    }
    RetryDecision::Schedule {
        attempt: attempts,
        delay: retry_delay(attempts, config),
    }
}
