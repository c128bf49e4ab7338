use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

/// Backoff multiplier applied after each failed attempt.
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// A retry interval generator that doubles on every attempt.
///
/// The first call to [`next_backoff`](Self::next_backoff) yields the initial interval. Every
/// subsequent call doubles it until `max_interval` is reached. Intervals carry no jitter, so they
/// are predictable in tests.
#[derive(Debug)]
pub struct RetryBackoff {
    backoff: ExponentialBackoff,
    attempt: usize,
}

impl RetryBackoff {
    /// Creates a new retry backoff bounded by the given intervals.
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        let initial_interval = initial_interval.min(max_interval);
        let backoff = ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: 0.0,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };

        RetryBackoff {
            backoff,
            attempt: 0,
        }
    }

    /// Indicates whether a backoff attempt has started.
    #[inline]
    pub fn started(&self) -> bool {
        self.attempt > 0
    }

    /// Returns the number of the retry attempt.
    #[inline]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the next backoff duration.
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt += 1;
        self.backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval)
    }
}
