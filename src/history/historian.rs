//! Interval-gated sample aggregation

use super::RollingWindow;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

type Callback<T> = Box<dyn Fn(&RollingWindow<T>) + Send + Sync>;

/// Pushes samples into a [`RollingWindow`] at most once per wall-clock
/// interval and fires a callback on every accepted sample.
///
/// The interval buckets are aligned to the wall clock (`timestamp /
/// interval`), not to the first observed sample, so callback cadence lines
/// up across historians regardless of when each one saw its first event.
/// A zero interval accepts every sample.
///
/// Not safe for concurrent updates; each historian belongs to the single
/// task that drives its exchange.
pub struct Historian<T> {
    callback: Callback<T>,
    interval: Duration,
    epoch: i64,
    window: RollingWindow<T>,
}

impl<T> fmt::Debug for Historian<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Historian")
            .field("interval", &self.interval)
            .field("epoch", &self.epoch)
            .field("len", &self.window.len())
            .field("capacity", &self.window.capacity())
            .finish()
    }
}

impl<T> Historian<T> {
    /// Create a historian with the given gating interval and window capacity
    pub fn new(
        interval: Duration,
        capacity: usize,
        callback: impl Fn(&RollingWindow<T>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
            interval,
            epoch: 0,
            window: RollingWindow::new(capacity),
        }
    }

    /// Offer a sample observed at `now`.
    ///
    /// If `now` falls in the same interval bucket as the last accepted
    /// sample, nothing happens: no push, no callback, no epoch change.
    /// Otherwise the sample is pushed, the new epoch is recorded, and the
    /// callback fires with read access to the window.
    pub fn update(&mut self, now: DateTime<Utc>, sample: T) {
        let mut epoch = self.epoch;
        if !self.interval.is_zero() {
            let nanos = now.timestamp_nanos_opt().unwrap_or(0);
            epoch = nanos / self.interval.as_nanos() as i64;
            if epoch == self.epoch {
                return;
            }
        }
        self.window.push(sample);
        self.epoch = epoch;
        (self.callback)(&self.window);
    }

    /// Read access to the underlying window
    pub fn window(&self) -> &RollingWindow<T> {
        &self.window
    }
}

impl<T: Copy + Into<f64>> Historian<T> {
    /// All accepted samples converted to `f64`, oldest first
    pub fn floats(&self) -> Vec<f64> {
        self.window.floats()
    }
}
