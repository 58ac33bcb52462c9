// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::sync::{Arc, Mutex};

use metronome::Clock;

use super::CircuitState;
use crate::constants::{DEFAULT_IDLE_WINDOW_CAPACITY, ERR_POISONED_LOCK};
use crate::options::AdaptiveOptions;
use crate::pid::{Outcome, PidMetrics, SharedPidController};
use crate::rnd::Rnd;
use crate::scheduler::{TickRegistration, TickScheduler};
use crate::window::TimeWindow;

/// The adaptive circuit breaker: a continuous rejection probability instead of a
/// discrete state machine.
///
/// Every call runs a Bernoulli trial against the controller's current rejection
/// rate, so a degrading dependency sheds a growing *fraction* of its traffic rather
/// than flipping between all-or-nothing. The conventional state vocabulary is
/// derived for interoperability: a rejection rate of `1.0` reports open, `0.0`
/// reports closed, anything between reports half-open.
///
/// The breaker registers its controller with the engine's background scheduler at
/// construction; the scheduler drives one controller tick per window. Dropping the
/// breaker (or calling [`destroy`][Self::destroy]) unregisters it.
#[derive(Debug)]
pub struct AdaptiveBreaker {
    clock: Clock,
    controller: Arc<SharedPidController>,
    rnd: Rnd,
    recent: Mutex<TimeWindow<()>>,
    last_error: Mutex<Option<String>>,
    registration: Mutex<Option<TickRegistration>>,
}

impl AdaptiveBreaker {
    pub(crate) fn new(clock: &Clock, options: &AdaptiveOptions, scheduler: &TickScheduler) -> Self {
        let controller = Arc::new(SharedPidController::new(options));
        let registration = scheduler.register(&controller);

        Self {
            clock: clock.clone(),
            controller,
            rnd: Rnd::default(),
            recent: Mutex::new(TimeWindow::new(options.idle_window, DEFAULT_IDLE_WINDOW_CAPACITY)),
            last_error: Mutex::new(None),
            registration: Mutex::new(Some(registration)),
        }
    }

    #[cfg(test)]
    fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    /// Whether the next request may proceed.
    ///
    /// Rejections are counted toward the controller's current window; each call also
    /// refreshes the breaker's recent-activity tracking.
    #[must_use]
    pub fn request_allowed(&self) -> bool {
        let now = self.clock.instant();
        self.recent.lock().expect(ERR_POISONED_LOCK).push(now, ());

        if self.controller.should_reject(&self.rnd) {
            self.controller.record(Outcome::Rejected);
            false
        } else {
            true
        }
    }

    /// Records a successful call.
    pub fn mark_success(&self) {
        self.controller.record(Outcome::Success);
    }

    /// Records a failed call with its rendered message.
    pub fn mark_failed(&self, message: &str) {
        *self.last_error.lock().expect(ERR_POISONED_LOCK) = Some(message.to_string());
        self.controller.record(Outcome::Error);
    }

    /// Forces one controller tick immediately, regardless of window boundaries.
    ///
    /// The background scheduler drives ticks in production; this entry point exists
    /// for tests and for manually driven setups.
    pub fn update(&self) {
        self.controller.update();
    }

    /// The circuit-state view of the current rejection rate.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let rate = self.controller.rejection_rate();
        if rate >= 1.0 {
            CircuitState::Open
        } else if rate <= 0.0 {
            CircuitState::Closed
        } else {
            CircuitState::HalfOpen
        }
    }

    /// Probability that the next request is shed.
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        self.controller.rejection_rate()
    }

    /// Discards all learned state: rejection rate, integral, baseline, counters.
    pub fn reset(&self) {
        self.controller.reset();
        *self.last_error.lock().expect(ERR_POISONED_LOCK) = None;
        self.recent.lock().expect(ERR_POISONED_LOCK).clear();
    }

    /// Whether any request was seen within the idle window.
    #[must_use]
    pub fn in_use(&self) -> bool {
        let now = self.clock.instant();
        self.recent.lock().expect(ERR_POISONED_LOCK).is_active(now)
    }

    /// The rendered message of the last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect(ERR_POISONED_LOCK).clone()
    }

    /// The controller's current state, read without locking.
    #[must_use]
    pub fn metrics(&self) -> PidMetrics {
        self.controller.metrics()
    }

    /// Stops background updates and discards all learned state.
    pub fn destroy(&self) {
        let _ = self.registration.lock().expect(ERR_POISONED_LOCK).take();
        self.controller.reset();
    }

    pub(crate) fn controller(&self) -> &Arc<SharedPidController> {
        &self.controller
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metronome::ClockControl;

    use super::*;

    fn scheduler(clock: &Clock) -> TickScheduler {
        TickScheduler::new(clock, Duration::from_secs(1))
    }

    /// One window of total failure clamps the rejection rate to 1.0 exactly.
    fn saturated(breaker: &AdaptiveBreaker) {
        for _ in 0..100 {
            breaker.mark_failed("down");
        }
        breaker.update();
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(AdaptiveBreaker: Send, Sync);
    }

    #[test]
    fn fresh_breaker_is_closed_and_permissive() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.request_allowed());
        assert!((breaker.rejection_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn saturation_reports_open_and_rejects() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        saturated(&breaker);

        assert_eq!(breaker.state(), CircuitState::Open);
        // A rejection rate of 1.0 rejects regardless of the sampled value.
        assert!(!breaker.request_allowed());
        assert_eq!(breaker.metrics().rejected, 1);
    }

    #[test]
    fn partial_rejection_reports_half_open() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        for _ in 0..20 {
            breaker.mark_failed("flaky");
        }
        for _ in 0..80 {
            breaker.mark_success();
        }
        breaker.update();

        let rate = breaker.rejection_rate();
        assert!(rate > 0.0 && rate < 1.0, "expected partial rejection, got {rate}");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn bernoulli_trial_uses_the_injected_source() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker =
            AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler).with_rnd(Rnd::pinned(0.5));

        for _ in 0..20 {
            breaker.mark_failed("flaky");
        }
        for _ in 0..80 {
            breaker.mark_success();
        }
        breaker.update();
        let rate = breaker.rejection_rate();
        assert!(rate > 0.0 && rate < 1.0);

        if rate > 0.5 {
            assert!(!breaker.request_allowed());
        } else {
            assert!(breaker.request_allowed());
        }
    }

    #[test]
    fn reset_returns_to_closed() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        saturated(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.request_allowed());
        assert_eq!(breaker.last_error(), None);
    }

    #[test]
    fn in_use_expires_with_the_idle_window() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let scheduler = scheduler(&clock);
        let options = AdaptiveOptions::default().with_idle_window(Duration::from_secs(60));
        let breaker = AdaptiveBreaker::new(&clock, &options, &scheduler);

        assert!(!breaker.in_use());
        assert!(breaker.request_allowed());
        assert!(breaker.in_use());

        control.advance(Duration::from_secs(61));
        assert!(!breaker.in_use());
    }

    #[test]
    fn last_error_tracks_latest_failure() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        breaker.mark_failed("first");
        breaker.mark_failed("second");

        assert_eq!(breaker.last_error().as_deref(), Some("second"));
    }

    #[test]
    fn destroy_unregisters_from_the_scheduler() {
        let clock = ClockControl::new().to_clock();
        let scheduler = scheduler(&clock);
        let breaker = AdaptiveBreaker::new(&clock, &AdaptiveOptions::default(), &scheduler);

        saturated(&breaker);
        breaker.destroy();

        // Learned state is gone and the registration has been dropped.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.registration.lock().expect("registration lock").is_none());
    }
}
