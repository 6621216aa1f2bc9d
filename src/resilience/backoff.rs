//! Deterministic exponential backoff.

use std::time::Duration;

use crate::config::RetryConfig;

/// Delay schedule for one retry sequence.
///
/// Starts at the initial interval, multiplies after every failed attempt and
/// caps each interval at the maximum. No jitter: the same config always yields
/// the same schedule.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    remaining: u32,
}

impl ExponentialBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        let max = config.max_interval();
        Self {
            current: config.initial_interval().min(max),
            max,
            multiplier: config.multiplier,
            remaining: config.max_retries,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    /// Delay before the next retry, or `None` once the retry budget is spent.
    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.multiplier;
        self.current = if grown.is_finite() && grown < self.max.as_secs_f64() {
            Duration::from_secs_f64(grown)
        } else {
            self.max
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, retries: u32) -> RetryConfig {
        RetryConfig::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            multiplier,
            retries,
        )
    }

    #[test]
    fn test_backoff_calculation() {
        let delays: Vec<_> = ExponentialBackoff::new(&config(100, 2000, 2.0, 10)).collect();
        assert_eq!(delays.len(), 10);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[9], Duration::from_millis(2000));
    }

    #[test]
    fn test_schedule_is_capped_and_bounded() {
        let delays: Vec<_> = ExponentialBackoff::new(&config(100, 300, 2.0, 4)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn test_huge_multiplier_saturates_at_max() {
        let mut backoff = ExponentialBackoff::new(&config(1, 500, f64::MAX, 3));
        assert_eq!(backoff.next(), Some(Duration::from_millis(1)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next(), None);
    }

    #[test]
    fn test_zero_retries_yields_nothing() {
        assert_eq!(ExponentialBackoff::new(&config(100, 200, 2.0, 0)).next(), None);
    }
}
