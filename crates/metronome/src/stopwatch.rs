// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use super::Clock;

/// A stopwatch that facilitates the measurement of elapsed time.
///
/// An instance of `Stopwatch` is created by calling [`Clock::stopwatch`] or by passing
/// a [`Clock`] to [`Stopwatch::new`]. The stopwatch reads the clock it was created
/// from, so controlled time in tests is respected.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::Clock;
///
/// # fn measure(clock: &Clock) -> Duration {
/// let stopwatch = clock.stopwatch();
/// // Perform some operation...
/// stopwatch.elapsed()
/// # }
/// ```
#[derive(Debug)]
pub struct Stopwatch {
    clock: Clock,
    start: Instant,
}

impl Stopwatch {
    /// Creates a stopwatch that starts measuring now.
    #[must_use]
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: clock.clone(),
            start: clock.instant(),
        }
    }

    /// Returns the time elapsed since the stopwatch was created or last restarted.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.instant().duration_since(self.start)
    }

    /// Restarts the measurement from zero.
    pub fn restart(&mut self) {
        self.start = self.clock.instant();
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClockControl;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Stopwatch: Send, Sync);
    }

    #[test]
    fn elapsed_tracks_controlled_time() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let stopwatch = clock.stopwatch();

        control.advance(Duration::from_millis(250));

        assert_eq!(stopwatch.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn restart_resets_measurement() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let mut stopwatch = clock.stopwatch();

        control.advance(Duration::from_secs(5));
        stopwatch.restart();
        control.advance(Duration::from_secs(2));

        assert_eq!(stopwatch.elapsed(), Duration::from_secs(2));
    }
}
