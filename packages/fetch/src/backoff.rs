//! Retry delay computation.
//!
//! Ordinary transient failures back off exponentially (`base * 2^(n-1)`)
//! plus a small random jitter. Gateway timeouts (HTTP 504) back off
//! harder (`base * 3^(n-1)`) but are capped, because a flaky upstream
//! gateway tends to recover on a scale of seconds, not minutes.
//!
//! Independently of the per-request attempt counter, a
//! [`GatewayTimeoutTracker`] counts gateway timeouts in a row across
//! requests. Once the streak reaches a threshold one long cooldown sleep is
//! forced, so a persistently degraded upstream does not get hammered with
//! thousands of fast-failing requests.

use std::time::Duration;

use serde::Deserialize;

use crate::ErrorClass;

/// Backoff tuning. All durations are in milliseconds so the struct maps
/// directly onto a TOML table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Base delay for the first retry.
    pub base_ms: u64,
    /// Upper bound (exclusive) of the uniform jitter added to ordinary
    /// retries.
    pub max_jitter_ms: u64,
    /// Ceiling for gateway-timeout delays.
    pub gateway_timeout_ceiling_ms: u64,
    /// Consecutive gateway timeouts (across requests) that trigger a
    /// cooldown.
    pub gateway_timeout_streak: u32,
    /// Length of the forced cooldown sleep.
    pub gateway_timeout_cooldown_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_jitter_ms: 100,
            gateway_timeout_ceiling_ms: 30_000,
            gateway_timeout_streak: 5,
            gateway_timeout_cooldown_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after failed attempt number `attempt`
    /// (1-based).
    ///
    /// `jitter_unit` is a uniform sample from `[0, 1)`; it is scaled to
    /// `[0, max_jitter)` and only applied to non-gateway classes. Pass
    /// `0.0` for a deterministic delay.
    #[must_use]
    pub fn delay(&self, attempt: u32, class: ErrorClass, jitter_unit: f64) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = Duration::from_millis(self.base_ms).as_secs_f64();

        match class {
            ErrorClass::GatewayTimeout => {
                let ceiling = Duration::from_millis(self.gateway_timeout_ceiling_ms);
                secs_to_duration(base * 3f64.powi(exponent)).min(ceiling)
            }
            ErrorClass::RateLimited | ErrorClass::ServerError | ErrorClass::Timeout => {
                let jitter = Duration::from_millis(self.max_jitter_ms).as_secs_f64()
                    * jitter_unit.clamp(0.0, 1.0);
                secs_to_duration(base.mul_add(2f64.powi(exponent), jitter))
            }
        }
    }

    /// The forced cooldown sleep after a gateway-timeout streak.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_cooldown_ms)
    }
}

/// Converts seconds to a [`Duration`], saturating instead of panicking on
/// overflow or non-finite input.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Counts gateway timeouts in a row, across logical requests.
#[derive(Debug, Clone)]
pub struct GatewayTimeoutTracker {
    streak: u32,
    threshold: u32,
}

impl GatewayTimeoutTracker {
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            streak: 0,
            threshold,
        }
    }

    /// Records a transient failure. Returns `true` when the gateway-timeout
    /// streak just reached the threshold; the streak is reset in that case.
    pub const fn observe(&mut self, class: ErrorClass) -> bool {
        if !matches!(class, ErrorClass::GatewayTimeout) {
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        if self.threshold > 0 && self.streak >= self.threshold {
            self.streak = 0;
            return true;
        }
        false
    }

    /// Clears the streak (called on any non-gateway outcome).
    pub const fn reset(&mut self) {
        self.streak = 0;
    }

    /// Current number of consecutive gateway timeouts.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator as _;

    use super::*;

    #[test]
    fn exponential_without_jitter() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1, ErrorClass::ServerError, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay(2, ErrorClass::ServerError, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay(4, ErrorClass::RateLimited, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_below_max() {
        let policy = BackoffPolicy::default();
        let jittered = policy.delay(1, ErrorClass::Timeout, 0.999);
        assert!(jittered >= Duration::from_secs(1));
        assert!(jittered < Duration::from_millis(1_100));
    }

    #[test]
    fn gateway_timeout_grows_by_three_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(1));
        assert_eq!(policy.delay(2, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(3));
        assert_eq!(policy.delay(3, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(9));
        assert_eq!(policy.delay(4, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(27));
        assert_eq!(policy.delay(5, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(30));
        assert_eq!(policy.delay(40, ErrorClass::GatewayTimeout, 0.5), Duration::from_secs(30));
    }

    #[test]
    fn delays_are_monotonic_per_class() {
        let policy = BackoffPolicy::default();
        for class in ErrorClass::iter() {
            let mut previous = Duration::ZERO;
            for attempt in 1..=12 {
                let delay = policy.delay(attempt, class, 0.0);
                assert!(delay >= previous, "{class} attempt {attempt}");
                previous = delay;
            }
        }
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(u32::MAX, ErrorClass::ServerError, 0.0), Duration::MAX);
    }

    #[test]
    fn tracker_triggers_cooldown_at_threshold_and_resets() {
        let mut tracker = GatewayTimeoutTracker::new(3);
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        assert!(tracker.observe(ErrorClass::GatewayTimeout));
        assert_eq!(tracker.streak(), 0);
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        assert_eq!(tracker.streak(), 1);
    }

    #[test]
    fn tracker_streak_broken_by_other_classes() {
        let mut tracker = GatewayTimeoutTracker::new(2);
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        assert!(!tracker.observe(ErrorClass::ServerError));
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        tracker.reset();
        assert!(!tracker.observe(ErrorClass::GatewayTimeout));
        assert!(tracker.observe(ErrorClass::GatewayTimeout));
    }
}
