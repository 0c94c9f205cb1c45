// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded exponential backoff for transient store errors.

use std::time::Duration;

/// Retry configuration for gateway operations.
///
/// Delays follow `initial_delay * 2^(attempt-1)`, capped at `max_delay`.
/// The request deadline still bounds the whole operation from above; the
/// orchestrator enforces it around every gateway call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (1-indexed).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u64.saturating_pow((attempt - 1) as u32);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(multiplier);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_with_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }
}
