use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnect delay policy: fixed initial delay doubling per attempt, capped,
/// with a bounded attempt count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;
        let exp = self.attempt.saturating_sub(1).min(20);
        let delay = self
            .config
            .initial
            .saturating_mul(1u32 << exp)
            .min(self.config.cap);
        Some(delay)
    }

    /// Reset after a successful open so the next failure starts from the
    /// initial delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 8,
        });

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(5),
            max_attempts: 3,
        });

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
