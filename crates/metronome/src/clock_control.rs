// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use super::Clock;

const ERR_POISONED_LOCK: &str = "clock control state lock is never poisoned";

/// Controls the passage of time in tests.
///
/// `ClockControl` is available when the `test-util` feature is enabled. Clocks created
/// through [`ClockControl::to_clock`] stay linked to their controller: they report the
/// controller's frozen time and observe every [`advance`][Self::advance].
///
/// Time does not flow on its own. A freshly created controller reports the wall-clock
/// time and monotonic instant captured at construction, forever, until the test
/// advances it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use metronome::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let now = clock.system_time();
/// control.advance(Duration::from_secs(1));
///
/// assert_eq!(clock.system_time().duration_since(now)?, Duration::from_secs(1));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// # Production code and `ClockControl`
///
/// Never enable the `test-util` feature outside of `dev-dependencies`. The state
/// indirection it compiles in is pure overhead in production.
#[derive(Clone)]
pub struct ClockControl {
    /// Controlling the passage of time across threads requires consistent state,
    /// hence the mutex.
    state: Arc<Mutex<State>>,
}

struct State {
    instant: Instant,
    system_time: SystemTime,
    auto_advance: Option<Duration>,
}

impl std::fmt::Debug for ClockControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(ERR_POISONED_LOCK);

        f.debug_struct("ClockControl")
            .field("system_time", &state.system_time)
            .field("auto_advance", &state.auto_advance)
            .finish_non_exhaustive()
    }
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl {
    /// Creates a controller frozen at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                instant: Instant::now(),
                system_time: SystemTime::now(),
                auto_advance: None,
            })),
        }
    }

    /// Creates a controller frozen at the specified wall-clock time.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, SystemTime};
    ///
    /// use metronome::ClockControl;
    ///
    /// let time = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
    /// let clock = ClockControl::new_at(time).to_clock();
    ///
    /// assert_eq!(clock.system_time(), time);
    /// ```
    #[must_use]
    pub fn new_at(time: impl Into<SystemTime>) -> Self {
        let this = Self::new();
        this.state.lock().expect(ERR_POISONED_LOCK).system_time = time.into();
        this
    }

    /// Makes every time reading advance the clock by `step` after reporting.
    ///
    /// This is convenient for code that polls the clock in a loop and would otherwise
    /// never observe progress under a frozen controller.
    #[must_use]
    pub fn auto_advance(self, step: Duration) -> Self {
        self.state.lock().expect(ERR_POISONED_LOCK).auto_advance = Some(step);
        self
    }

    /// Converts this controller into a [`Clock`].
    ///
    /// The returned clock is internally linked to this controller; cloning the clock
    /// preserves the link.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock::with_control(self)
    }

    /// Moves time forward by `duration`.
    ///
    /// Both the monotonic instant and the wall-clock time advance by the same amount.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);
        state.advance(duration);
    }

    pub(crate) fn system_time(&self) -> SystemTime {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);
        let time = state.system_time;
        state.apply_auto_advance();
        time
    }

    pub(crate) fn instant(&self) -> Instant {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);
        let instant = state.instant;
        state.apply_auto_advance();
        instant
    }
}

impl State {
    fn advance(&mut self, duration: Duration) {
        // Saturate rather than panic when a test advances time absurdly far.
        self.instant = self.instant.checked_add(duration).unwrap_or(self.instant);
        self.system_time = self.system_time.checked_add(duration).unwrap_or(self.system_time);
    }

    fn apply_auto_advance(&mut self) {
        if let Some(step) = self.auto_advance {
            self.advance(step);
        }
    }
}
