//! Retry policy for transient remote failures.
//!
//! Transient errors are retried a bounded number of times with
//! exponential backoff. Fatal errors are never retried. A server-sent
//! retry hint takes precedence over the computed delay.

use std::time::Duration;

use crate::error::RemoteError;

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit bounds.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns true if another attempt is allowed after `attempt`
    /// failures.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Computes the backoff delay after the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u64 << exponent;
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }

    /// Computes the delay after a failed attempt, honoring the server's
    /// retry hint when one was provided.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, error: &RemoteError) -> Duration {
        if let RemoteError::Transient {
            retry_after_secs: Some(secs),
            ..
        } = error
        {
            return Duration::from_secs(*secs);
        }
        self.delay_for(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[test]
    fn test_allows_is_bounded() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn test_server_hint_overrides_backoff() {
        let policy = RetryPolicy::default();
        let err = RemoteError::Transient {
            message: String::from("rate limited"),
            retry_after_secs: Some(7),
        };
        assert_eq!(policy.delay_after(1, &err), Duration::from_secs(7));
    }

    #[test]
    fn test_no_hint_uses_backoff() {
        let policy = RetryPolicy::default();
        let err = RemoteError::transient("flaky");
        assert_eq!(policy.delay_after(2, &err), Duration::from_millis(1000));
    }
}
