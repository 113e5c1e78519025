//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Backoff schedule shared by the engine's inline retry and the REST clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts, the first one included
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::try_from_secs_f64(scaled).unwrap_or(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn delays_grow_exponentially_until_capped() {
        let policy = fixed();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn attempts_include_the_first_try() {
        assert_eq!(RetryPolicy::default().attempts(), 4);
        assert_eq!(RetryPolicy::none().attempts(), 1);
    }
}
