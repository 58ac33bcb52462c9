// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::time::{Instant, SystemTime};

#[cfg(any(feature = "test-util", test))]
use super::ClockControl;
use super::Stopwatch;

/// Provides an abstraction for time-related operations.
///
/// In production a clock delegates directly to the operating system. In tests, a clock
/// created from a [`ClockControl`] (requires the `test-util` feature) returns whatever
/// time the controller says, which makes time-dependent logic fast and deterministic
/// to test.
///
/// Cloning a clock is inexpensive. Clones created from the same [`ClockControl`] remain
/// linked to it and observe the same controlled flow of time.
///
/// # Examples
///
/// ```
/// use metronome::Clock;
///
/// let clock = Clock::new();
/// let instant1 = clock.instant();
/// let instant2 = clock.instant();
///
/// assert!(instant2 >= instant1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Clock(ClockRepr);

#[derive(Debug, Clone, Default)]
enum ClockRepr {
    #[default]
    System,

    #[cfg(any(feature = "test-util", test))]
    Control(ClockControl),
}

impl Clock {
    /// Creates a clock that reads time from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self(ClockRepr::System)
    }

    /// Creates a clock whose time does not advance.
    ///
    /// This is a convenience method for `ClockControl::new().to_clock()`. The returned
    /// clock always reports the same instant and system time until time is advanced
    /// through a controller, which this constructor discards; use
    /// [`ClockControl::to_clock`] when the test needs to move time forward.
    #[cfg(any(feature = "test-util", test))]
    #[must_use]
    pub fn new_frozen() -> Self {
        ClockControl::new().to_clock()
    }

    /// Creates a clock frozen at the given wall-clock time.
    #[cfg(any(feature = "test-util", test))]
    #[must_use]
    pub fn new_frozen_at(time: SystemTime) -> Self {
        ClockControl::new_at(time).to_clock()
    }

    #[cfg(any(feature = "test-util", test))]
    pub(crate) fn with_control(control: &ClockControl) -> Self {
        Self(ClockRepr::Control(control.clone()))
    }

    /// Retrieves the current absolute time.
    ///
    /// The system time is not monotonic and can move backwards when the operating
    /// system clock is adjusted. For relative measurements use [`instant`][Self::instant]
    /// or a [`Stopwatch`].
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &self.0 {
            ClockRepr::System => SystemTime::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockRepr::Control(control) => control.system_time(),
        }
    }

    /// Retrieves the current monotonic time.
    ///
    /// The returned [`Instant`] is guaranteed to never decrease across calls on linked
    /// clocks. When measuring elapsed time against a controlled clock, always use
    /// [`Instant::duration_since`] rather than `Instant::elapsed`; `elapsed` bypasses
    /// the clock and reads system time directly.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockRepr::System => Instant::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockRepr::Control(control) => control.instant(),
        }
    }

    /// Creates a [`Stopwatch`] that starts measuring now.
    #[must_use]
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch::new(self)
    }
}

impl AsRef<Self> for Clock {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl From<&Self> for Clock {
    fn from(clock: &Self) -> Self {
        clock.clone()
    }
}
