//! Reconnect/retry backoff math.
//!
//! Pure, sync-only delay calculation; the async loops that use it live in
//! `haggle-auth` and `haggle-connection`. Policy: capped exponential
//! doubling with symmetric jitter.

use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Parameters for exponential backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Base delay for the first retry, in ms.
    pub base_delay_ms: u64,
    /// Delay ceiling, in ms.
    pub max_delay_ms: u64,
    /// Jitter range 0.0–1.0; 0.2 means the delay varies by ±20%.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (zero-based), given `random` in
    /// `[0.0, 1.0)` from the caller's PRNG.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32, random: f64) -> u64 {
        backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        )
    }
}

/// Calculate an exponential backoff delay with symmetric jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random*2 - 1) * jitter)`.
/// `random` maps `[0, 1)` onto `[-jitter, +jitter]`, so `random = 0.5`
/// yields the un-jittered value.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_without_jitter() {
        assert_eq!(backoff_delay(0, 1000, 60_000, 0.0, 0.5), 1000);
        assert_eq!(backoff_delay(1, 1000, 60_000, 0.0, 0.5), 2000);
        assert_eq!(backoff_delay(2, 1000, 60_000, 0.0, 0.5), 4000);
        assert_eq!(backoff_delay(3, 1000, 60_000, 0.0, 0.5), 8000);
    }

    #[test]
    fn caps_at_ceiling() {
        assert_eq!(backoff_delay(10, 1000, 60_000, 0.0, 0.5), 60_000);
    }

    #[test]
    fn jitter_is_symmetric() {
        // random = 0 → -20%, random = 0.5 → exact, random → 1 → +20%
        assert_eq!(backoff_delay(0, 1000, 60_000, 0.2, 0.0), 800);
        assert_eq!(backoff_delay(0, 1000, 60_000, 0.2, 0.5), 1000);
        assert_eq!(backoff_delay(0, 1000, 60_000, 0.2, 1.0), 1200);
    }

    #[test]
    fn high_attempt_does_not_overflow() {
        let delay = backoff_delay(200, 1000, 60_000, 0.2, 0.9);
        assert!(delay > 0);
        assert!(delay <= 72_000);
    }

    #[test]
    fn policy_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert!((policy.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn policy_serde_fills_defaults() {
        let policy: BackoffPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.base_delay_ms, 1000);
    }

    #[test]
    fn policy_delay_uses_fields() {
        let policy = BackoffPolicy {
            base_delay_ms: 500,
            max_delay_ms: 2000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_ms(0, 0.5), 500);
        assert_eq!(policy.delay_ms(3, 0.5), 2000);
    }
}
