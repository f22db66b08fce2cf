//! Reconnection policy: exponential backoff with jitter and an attempt cap.
//!
//! Attempts are numbered from 1 (the first retry after a failure). The raw
//! delay is `initial * multiplier^(attempt-1)`, capped at `max_backoff`, then
//! scaled by a random factor in `[1 - jitter, 1 + jitter]` and capped again.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Retry configuration, deserialized from the `retry` block of the config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive attempts.
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]`; `0.2` spreads delays by ±20 %.
    pub jitter: f64,
    /// Give up after this many consecutive failed attempts. `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self { max_attempts: Some(0), ..Self::default() }
    }

    /// Delay before retry number `attempt`, or `None` once attempts are
    /// exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let factor = if self.jitter > 0.0 {
            let j = self.jitter.min(1.0);
            rand::thread_rng().gen_range(1.0 - j..=1.0 + j)
        } else {
            1.0
        };
        self.delay_with_factor(attempt, factor)
    }

    /// Deterministic core of [`delay_for`](Self::delay_for): `factor` is the
    /// jitter multiplier to apply.
    pub fn delay_with_factor(&self, attempt: u32, factor: f64) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let max = self.max_backoff_ms as f64;
        let exp = self.multiplier.max(1.0).powi(attempt.saturating_sub(1).min(64) as i32);
        let raw = (self.initial_backoff_ms as f64 * exp).min(max);
        let jittered = (raw * factor.max(0.0)).min(max);
        Some(Duration::from_millis(jittered.round() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_then_caps() {
        let p = RetryPolicy { max_attempts: None, ..RetryPolicy::default() };
        let delays: Vec<u64> =
            (1..=12).map(|a| p.delay_with_factor(a, 1.0).unwrap().as_millis() as u64).collect();
        assert_eq!(&delays[..5], &[100, 200, 400, 800, 1600]);
        assert_eq!(delays[9], 30_000); // 100 * 2^9 = 51_200 → capped
        assert_eq!(delays[11], 30_000);
    }

    #[test]
    fn stops_after_max_attempts() {
        let p = RetryPolicy { max_attempts: Some(3), ..RetryPolicy::default() };
        assert!(p.delay_with_factor(3, 1.0).is_some());
        assert!(p.delay_with_factor(4, 1.0).is_none());
        assert!(RetryPolicy::disabled().delay_for(1).is_none());
    }

    #[test]
    fn jitter_stays_in_band() {
        let p = RetryPolicy { max_attempts: None, ..RetryPolicy::default() };
        for _ in 0..200 {
            let d = p.delay_for(3).unwrap().as_millis() as u64;
            assert!((320..=480).contains(&d), "delay {d} outside ±20% of 400");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = RetryPolicy { max_attempts: None, ..RetryPolicy::default() };
        assert_eq!(p.delay_with_factor(20, 1.2).unwrap(), Duration::from_millis(30_000));
    }

    #[test]
    fn deserializes_partial_block() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_attempts": null, "jitter": 0.0}"#).unwrap();
        assert_eq!(p.max_attempts, None);
        assert_eq!(p.jitter, 0.0);
        assert_eq!(p.initial_backoff_ms, 100);
    }
}
