use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Smoothing factor applied on every tick.
pub const EWMA_WEIGHT: f64 = 0.2;

/// An exponentially weighted moving average of an event rate.
///
/// Events are counted with [`incr`](Self::incr) from any thread. [`tick`](Self::tick) must be
/// called once per `interval` and folds the events of the past interval into the rate.
#[derive(Debug)]
pub struct EwmaRate {
    new_events: AtomicI64,
    alpha: f64,
    interval: Duration,
    state: Mutex<EwmaState>,
}

#[derive(Debug, Default)]
struct EwmaState {
    last_rate: f64,
    init: bool,
}

impl EwmaRate {
    /// Creates a rate with the given smoothing factor and tick interval.
    pub fn new(alpha: f64, interval: Duration) -> Self {
        Self {
            new_events: AtomicI64::new(0),
            alpha,
            interval,
            state: Mutex::new(EwmaState::default()),
        }
    }

    /// Returns the current rate in events per second.
    pub fn rate(&self) -> f64 {
        self.state.lock().last_rate
    }

    /// Counts `events` new events.
    pub fn incr(&self, events: i64) {
        self.new_events.fetch_add(events, Ordering::Relaxed);
    }

    /// Updates the rate with the events counted since the last tick.
    ///
    /// The rate is seeded with the first non-empty interval rather than decaying up from zero.
    pub fn tick(&self) {
        let new_events = self.new_events.swap(0, Ordering::Relaxed);
        let instant_rate = new_events as f64 / self.interval.as_secs_f64().max(f64::EPSILON);

        let mut state = self.state.lock();
        if state.init {
            state.last_rate += self.alpha * (instant_rate - state.last_rate);
        } else if new_events > 0 {
            state.init = true;
            state.last_rate = instant_rate;
        }
    }
}
