//! Retry policy
//!
//! Pure decision function over (attempt count, elapsed time) plus the pacing
//! pause between attempts. The policy never consults the breaker; breaker
//! denial terminates the decorator loop on its own.

use std::time::Duration;

use qg_common::ClientConfig;

/// Timeout-window retry with an optional hard attempt cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    timeout: Duration,
    max_attempts: Option<u32>,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: None,
            delay: qg_common::DEFAULT_RETRY_DELAY,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            timeout: config.retry_timeout,
            max_attempts: config.retry_attempts,
            delay: config.retry_delay,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether another attempt may start after `attempt` failures at
    /// `elapsed` since the first attempt began.
    ///
    /// True while the elapsed time is inside the retry window and the
    /// attempt bound (when configured) is not yet reached.
    pub fn should_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        if elapsed >= self.timeout {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Sleep before the next attempt, never past the retry window.
    ///
    /// Callers re-check `should_retry` afterwards so an attempt never starts
    /// once the window has closed.
    pub async fn pause_before_retry(&self, elapsed: Duration) {
        let remaining = self.timeout.saturating_sub(elapsed);
        let pause = self.delay.min(remaining);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_within_window() {
        let policy = RetryPolicy::new(Duration::from_secs(2));
        assert!(policy.should_retry(1, Duration::from_millis(500)));
        assert!(policy.should_retry(100, Duration::from_millis(1999)));
    }

    #[test]
    fn test_no_retry_at_or_past_window() {
        let policy = RetryPolicy::new(Duration::from_secs(2));
        assert!(!policy.should_retry(1, Duration::from_secs(2)));
        assert!(!policy.should_retry(1, Duration::from_secs(3)));
    }

    #[test]
    fn test_attempt_cap_checked_alongside_timeout() {
        let policy = RetryPolicy::new(Duration::from_secs(60)).with_max_attempts(3);
        assert!(policy.should_retry(1, Duration::ZERO));
        assert!(policy.should_retry(2, Duration::ZERO));
        assert!(!policy.should_retry(3, Duration::ZERO));
    }

    #[test]
    fn test_from_config() {
        let config = qg_common::ClientConfig::new("orders", Duration::from_millis(1500))
            .with_retry_attempts(5)
            .with_retry_delay(Duration::from_millis(10));
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.timeout(), Duration::from_millis(1500));
        assert_eq!(policy.delay(), Duration::from_millis(10));
        assert!(!policy.should_retry(5, Duration::ZERO));
    }

    #[tokio::test]
    async fn test_pause_clamped_to_remaining_window() {
        let policy =
            RetryPolicy::new(Duration::from_millis(100)).with_delay(Duration::from_secs(10));

        let start = std::time::Instant::now();
        policy.pause_before_retry(Duration::from_millis(90)).await;
        // Clamped to the ~10ms left in the window, not the 10s delay
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_pause_skipped_outside_window() {
        let policy =
            RetryPolicy::new(Duration::from_millis(100)).with_delay(Duration::from_secs(10));

        let start = std::time::Instant::now();
        policy.pause_before_retry(Duration::from_millis(200)).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
