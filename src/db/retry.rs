use std::time::Duration;
use tracing::debug;

/// Shape of the random component added to an exponential delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    None,
    /// Add up to the given fraction of the computed delay.
    Proportional(f64),
    /// Add a uniform random duration below the given bound.
    Additive(Duration),
}

/// Exponential backoff schedule shared by connection dialing and query
/// retries. Delays double per attempt and never exceed `max_delay`, jitter
/// included.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Schedule for dialing the database: caller-supplied attempt budget and
    /// base delay, up to 30% proportional jitter, capped at 30 seconds.
    pub fn connect(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: Jitter::Proportional(0.3),
        }
    }

    /// Schedule for query retries: three attempts starting at one second,
    /// plus up to 500ms of additive jitter, capped at 10 seconds.
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: Jitter::Additive(Duration::from_millis(500)),
        }
    }

    /// Deterministic delay before the attempt after `attempt` failures.
    /// Attempts are 1-based; 0 is treated as the first attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let raw = self.base_delay.saturating_mul(1u32 << exp);
        raw.min(self.max_delay)
    }

    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = match self.jitter {
            Jitter::None => Duration::ZERO,
            Jitter::Proportional(fraction) => base.mul_f64(fraction * rand::random::<f64>()),
            Jitter::Additive(bound) => bound.mul_f64(rand::random::<f64>()),
        };
        base.saturating_add(jitter).min(self.max_delay)
    }

    pub async fn sleep_before(&self, attempt: u32) {
        let delay = self.jittered_delay(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let config = RetryConfig::connect(5, Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let config = RetryConfig::connect(10, Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_counts_as_first() {
        let config = RetryConfig::query();
        assert_eq!(config.delay_for_attempt(0), config.delay_for_attempt(1));
    }

    #[test]
    fn query_preset_follows_schedule() {
        let config = RetryConfig::query();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        // 2^4 = 16s exceeds the 10s cap
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn proportional_jitter_stays_in_bounds() {
        let config = RetryConfig::connect(5, Duration::from_millis(100));
        for _ in 0..200 {
            let jittered = config.jittered_delay(2);
            assert!(jittered >= Duration::from_millis(200));
            assert!(jittered <= Duration::from_millis(260));
        }
    }

    #[test]
    fn additive_jitter_stays_in_bounds() {
        let config = RetryConfig::query();
        for _ in 0..200 {
            let jittered = config.jittered_delay(1);
            assert!(jittered >= Duration::from_secs(1));
            assert!(jittered <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let config = RetryConfig::connect(10, Duration::from_secs(20));
        for _ in 0..100 {
            assert!(config.jittered_delay(4) <= Duration::from_secs(30));
        }
    }
}
