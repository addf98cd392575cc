//! Small helpers for rate-limited and counted work.

use parking_lot::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Lets an action through at most once per period.
///
/// The first [`Limiter::ready`] returns `true` only after one full period
/// has elapsed since construction. Reads take the cheap path; the clock is
/// only rearmed under the write lock.
pub struct Limiter {
    period: Duration,
    next: RwLock<Instant>,
}

impl Limiter {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: RwLock::new(Instant::now() + period),
        }
    }

    /// Returns `true` at most once per period, rearming the period on every
    /// `true`.
    pub fn ready(&self) -> bool {
        if Instant::now() < *self.next.read() {
            return false;
        }
        let mut next = self.next.write();
        // Another caller may have won the period between the read and the
        // write lock.
        if Instant::now() < *next {
            return false;
        }
        *next = Instant::now() + self.period;
        true
    }
}

/// Callback fired when the count crosses the threshold from below.
type ThresholdCallback = Box<dyn Fn() + Send + Sync>;

/// Counts events, optionally firing a callback when the running total
/// crosses a threshold.
///
/// The callback fires on the upward crossing only; it rearms once the count
/// drops back below the threshold (via [`Counter::reset`]).
#[derive(Default)]
pub struct Counter {
    inner: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    number: u64,
    threshold: u64,
    fired: bool,
    callback: Option<ThresholdCallback>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one and returns the new count. The threshold callback, if any,
    /// runs on this thread; it must not call back into the counter.
    pub fn count(&self) -> u64 {
        let mut state = self.inner.lock();
        state.number += 1;

        if state.threshold != 0 {
            if state.fired && state.number < state.threshold {
                state.fired = false;
            } else if !state.fired && state.number >= state.threshold {
                if let Some(callback) = &state.callback {
                    callback();
                }
                state.fired = true;
            }
        }

        state.number
    }

    /// The current count.
    pub fn value(&self) -> u64 {
        self.inner.lock().number
    }

    /// Sets the count back to zero; the threshold callback rearms on the
    /// next count below the threshold.
    pub fn reset(&self) {
        self.inner.lock().number = 0;
    }

    /// Calls `callback` whenever the count reaches the threshold from
    /// below.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().callback = Some(Box::new(callback));
    }

    /// Sets the count at which the callback fires. Zero disables it.
    pub fn set_threshold(&self, threshold: u64) {
        self.inner.lock().threshold = threshold;
    }
}
