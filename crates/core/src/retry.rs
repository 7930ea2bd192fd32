//! Bounded exponential backoff.
//!
//! One policy serves both hot paths that need it: optimistic-concurrency
//! conflicts in the ledger and transient provider errors in workflow steps.

use std::time::Duration;

/// Retry policy: exponential backoff with a cap and deterministic jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-indexed): `base * 2^(n-1)`,
    /// capped at `max_delay`, plus a small deterministic jitter so callers
    /// retrying in lockstep spread out without needing an RNG.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(20));
        let capped = exp.min(max_ms);

        // +-10% spread derived from the attempt number.
        let jitter = capped / 10;
        let offset = (u64::from(attempt).wrapping_mul(37) % (2 * jitter.max(1))) as i64 - jitter as i64;

        Duration::from_millis(capped.saturating_add_signed(offset))
    }
}
