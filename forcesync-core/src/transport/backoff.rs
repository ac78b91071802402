/*
    backoff.rs - Reconnect delay policy

    delay(attempt) = min(base * factor^attempt, max) + jitter

    The jitter is a uniform sample in [0, ratio) of the capped delay. The
    capped part is non-decreasing in `attempt`.
*/

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Attempts above this all produce the capped delay
const MAX_EXPONENT: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            factor: 1.8,
            jitter: 0.5,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Backoff::new(config.base_delay, config.max_delay)
            .with_factor(config.factor)
            .with_jitter(config.jitter)
    }

    /// Delay for `attempt` without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(MAX_EXPONENT) as i32);
        let secs = self.base.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }

    fn jitter_for(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return Duration::ZERO;
        }
        delay.mul_f64(rand::random::<f64>() * self.jitter.min(1.0))
    }

    /// Delay to wait before reconnect attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        delay + self.jitter_for(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::from_config(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_secs(actual: Duration, expected: f64) {
        assert!(
            (actual.as_secs_f64() - expected).abs() < 1e-6,
            "expected {}s, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_growth_and_cap() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(30)).with_jitter(0.0);

        assert_secs(backoff.delay(0), 1.0);
        assert_secs(backoff.delay(1), 1.8);
        assert_secs(backoff.delay(2), 3.24);
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(30));
        for attempt in 0..12 {
            let base = backoff.base_delay(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base + base / 2);
            }
        }
    }

    #[test]
    fn test_zero_base() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(5)).with_jitter(0.0);
        assert_eq!(backoff.delay(100), Duration::ZERO);
    }
}
