//! Retry policy for transient step failures.
//!
//! Stateless: all logic is in associated functions that take the policy as a
//! parameter, so the executor can be tested with deterministic jitter.

use std::time::Duration;

use rand::Rng;
use waypoint_types::config::RetryPolicy;
use waypoint_types::outcome::FailureKind;

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt may follow a failure of `kind` on 1-based
    /// `attempt`.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, kind: FailureKind) -> bool {
        kind.is_retryable() && attempt < policy.max_attempts
    }

    /// Un-jittered delay before retry `retry` (1 = first retry):
    /// `min(base * 2^(retry-1), max)`.
    pub fn base_delay(policy: &RetryPolicy, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let millis = policy
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(policy.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Base delay with symmetric jitter applied, clamped to `[base, max]`.
    pub fn jittered_delay<R: Rng>(policy: &RetryPolicy, retry: u32, rng: &mut R) -> Duration {
        let base = Self::base_delay(policy, retry).as_millis() as f64;
        let ratio = policy.jitter_ratio.clamp(0.0, 1.0);
        let factor = if ratio > 0.0 {
            rng.gen_range(-ratio..=ratio)
        } else {
            0.0
        };
        let low = policy.base_delay_ms.min(policy.max_delay_ms) as f64;
        let high = policy.max_delay_ms as f64;
        let millis = (base * (1.0 + factor)).clamp(low, high);
        Duration::from_millis(millis.round() as u64)
    }

    /// Delay before retry `retry` using the thread-local RNG.
    pub fn delay_for_retry(policy: &RetryPolicy, retry: u32) -> Duration {
        Self::jittered_delay(policy, retry, &mut rand::thread_rng())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_should_retry_only_transient_within_budget() {
        let policy = RetryPolicy::default();
        assert!(RetryHandler::should_retry(&policy, 1, FailureKind::Timeout));
        assert!(RetryHandler::should_retry(&policy, 2, FailureKind::RateLimited));
        assert!(!RetryHandler::should_retry(&policy, 3, FailureKind::TransientNetwork));
        assert!(!RetryHandler::should_retry(&policy, 1, FailureKind::AuthFailure));
        assert!(!RetryHandler::should_retry(&policy, 1, FailureKind::Unclassified));
    }

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(RetryHandler::base_delay(&policy, 1), Duration::from_secs(2));
        assert_eq!(RetryHandler::base_delay(&policy, 2), Duration::from_secs(4));
        assert_eq!(RetryHandler::base_delay(&policy, 4), Duration::from_secs(16));
        assert_eq!(RetryHandler::base_delay(&policy, 5), Duration::from_secs(30));
        assert_eq!(RetryHandler::base_delay(&policy, 60), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 1..=8 {
            for _ in 0..50 {
                let d = RetryHandler::jittered_delay(&policy, retry, &mut rng);
                assert!(d >= Duration::from_secs(2), "retry {retry}: {d:?}");
                assert!(d <= Duration::from_secs(30), "retry {retry}: {d:?}");

                let base = RetryHandler::base_delay(&policy, retry).as_millis() as f64;
                let ms = d.as_millis() as f64;
                assert!((ms - base).abs() <= base * 0.1 + 1.0, "retry {retry}: {d:?}");
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter_ratio: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(RetryHandler::delay_for_retry(&policy, 2), Duration::from_secs(4));
    }
}
