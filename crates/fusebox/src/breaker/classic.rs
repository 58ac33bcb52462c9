// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::num::NonZero;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metronome::Clock;

use super::{CircuitState, ClassicMetrics, OnStateChange};
use crate::constants::ERR_POISONED_LOCK;
use crate::options::ClassicOptions;
use crate::window::SlidingWindow;

/// The classic three-state circuit breaker.
///
/// Failures land in a bounded window of timestamps. When the window fills (that is,
/// `error_threshold` failures happened within `error_threshold_timeout` of each
/// other) the circuit opens and every request is rejected. After `error_timeout`
/// with no further failures the circuit goes half-open: requests are allowed again,
/// and `success_threshold` consecutive successes close the circuit while a single
/// failure re-opens it.
///
/// Failures older than `error_threshold_timeout` are purged before every evaluation,
/// and with a `lumping_interval` configured, failures closer together than the
/// interval count as one incident, so a burst from a single outage cannot trip the
/// circuit by itself.
///
/// All state lives under one mutex; no lock is held while observer callbacks run.
#[derive(Debug)]
pub struct ClassicBreaker {
    clock: Clock,
    options: ClassicOptions,
    on_state_change: Option<OnStateChange>,
    core: Mutex<Core>,
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    failures: SlidingWindow<Instant>,
    successes: u32,
    last_error: Option<String>,
    last_failure_at: Option<Instant>,
}

impl ClassicBreaker {
    pub(crate) fn new(clock: &Clock, options: ClassicOptions) -> Self {
        let window_size =
            NonZero::new(options.error_threshold.get() as usize).expect("error_threshold is non-zero by construction");

        Self {
            clock: clock.clone(),
            core: Mutex::new(Core {
                state: CircuitState::Closed,
                failures: SlidingWindow::new(window_size),
                successes: 0,
                last_error: None,
                last_failure_at: None,
            }),
            on_state_change: None,
            options,
        }
    }

    /// Installs an observer invoked after every state transition.
    ///
    /// The observer runs on the thread that caused the transition, outside the
    /// breaker's lock.
    #[must_use]
    pub(crate) fn on_state_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(OnStateChange::new(observer));
        self
    }

    /// Whether the next request may proceed.
    ///
    /// An open circuit whose last failure is older than `error_timeout` transitions
    /// to half-open here, so the caller that finds the circuit passable is also the
    /// first probe.
    #[must_use]
    pub fn request_allowed(&self) -> bool {
        let (allowed, transition) = {
            let mut core = self.core.lock().expect(ERR_POISONED_LOCK);
            let now = self.clock.instant();

            let mut transition = None;
            if core.state == CircuitState::Open && self.error_timeout_elapsed(&core, now) {
                core.state = CircuitState::HalfOpen;
                core.successes = 0;
                transition = Some(CircuitState::HalfOpen);
            }

            (core.state != CircuitState::Open, transition)
        };

        self.notify(transition);
        allowed
    }

    /// Records a successful call.
    ///
    /// While half-open, `success_threshold` consecutive successes close the circuit.
    /// In the closed state this is a no-op.
    pub fn mark_success(&self) {
        let transition = {
            let mut core = self.core.lock().expect(ERR_POISONED_LOCK);

            match core.state {
                CircuitState::HalfOpen => {
                    core.successes += 1;
                    if core.successes >= self.options.success_threshold.get() {
                        core.state = CircuitState::Closed;
                        core.failures.clear();
                        core.successes = 0;
                        Some(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Closed | CircuitState::Open => None,
            }
        };

        self.notify(transition);
    }

    /// Records a failed call with its rendered message.
    pub fn mark_failed(&self, message: &str) {
        let transition = {
            let mut core = self.core.lock().expect(ERR_POISONED_LOCK);
            let now = self.clock.instant();

            self.push_failure(&mut core, now);
            core.last_error = Some(message.to_string());
            self.purge_expired(&mut core, now);

            match core.state {
                CircuitState::Closed => {
                    if core.failures.is_full() {
                        core.state = CircuitState::Open;
                        Some(CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    core.state = CircuitState::Open;
                    core.successes = 0;
                    Some(CircuitState::Open)
                }
                CircuitState::Open => None,
            }
        };

        self.notify(transition);
    }

    /// Forces the breaker back to a pristine closed state.
    pub fn reset(&self) {
        let transition = {
            let mut core = self.core.lock().expect(ERR_POISONED_LOCK);
            core.failures.clear();
            core.successes = 0;
            core.last_error = None;
            core.last_failure_at = None;

            if core.state == CircuitState::Closed {
                None
            } else {
                core.state = CircuitState::Closed;
                Some(CircuitState::Closed)
            }
        };

        self.notify(transition);
    }

    /// The current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.core.lock().expect(ERR_POISONED_LOCK).state
    }

    /// Whether the breaker has observed recent activity: an open or probing
    /// circuit, or failures still inside the window.
    #[must_use]
    pub fn in_use(&self) -> bool {
        let mut core = self.core.lock().expect(ERR_POISONED_LOCK);
        let now = self.clock.instant();
        self.purge_expired(&mut core, now);

        core.state != CircuitState::Closed || !core.failures.is_empty()
    }

    /// The rendered message of the last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.core.lock().expect(ERR_POISONED_LOCK).last_error.clone()
    }

    /// The reduced trial-call timeout while the circuit is half-open.
    #[must_use]
    pub fn half_open_resource_timeout(&self) -> Option<Duration> {
        if self.state() == CircuitState::HalfOpen {
            self.options.half_open_resource_timeout
        } else {
            None
        }
    }

    /// A point-in-time view of the breaker.
    #[must_use]
    pub fn metrics(&self) -> ClassicMetrics {
        let core = self.core.lock().expect(ERR_POISONED_LOCK);

        ClassicMetrics {
            state: core.state,
            window_failures: core.failures.len(),
            half_open_successes: core.successes,
            last_error: core.last_error.clone(),
        }
    }

    fn error_timeout_elapsed(&self, core: &Core, now: Instant) -> bool {
        let last_failure = core.failures.last().copied().or(core.last_failure_at);
        last_failure.is_none_or(|at| now.duration_since(at) >= self.options.error_timeout)
    }

    /// Pushes a failure timestamp, merging failures that fall within the lumping
    /// interval of the previous one into a single incident.
    fn push_failure(&self, core: &mut Core, now: Instant) {
        let lumped = match (self.options.lumping_interval, core.last_failure_at) {
            (Some(interval), Some(last)) => now.duration_since(last) < interval,
            _ => false,
        };

        if !lumped {
            core.failures.push(now);
        }
        core.last_failure_at = Some(now);
    }

    fn purge_expired(&self, core: &mut Core, now: Instant) {
        let span = self.options.error_threshold_timeout;
        core.failures.retain(|at| now.duration_since(*at) <= span);
    }

    fn notify(&self, transition: Option<CircuitState>) {
        if let (Some(state), Some(observer)) = (transition, &self.on_state_change) {
            observer.call(state);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use metronome::ClockControl;

    use super::*;

    fn options() -> ClassicOptions {
        ClassicOptions::builder()
            .error_threshold(3)
            .error_threshold_timeout(Duration::from_secs(20))
            .error_timeout(Duration::from_secs(15))
            .success_threshold(2)
            .build()
            .expect("valid options")
    }

    fn breaker(control: &ClockControl) -> ClassicBreaker {
        ClassicBreaker::new(&control.to_clock(), options())
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ClassicBreaker: Send, Sync);
    }

    #[test]
    fn starts_closed_and_idle() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.request_allowed());
        assert!(!breaker.in_use());
        assert_eq!(breaker.last_error(), None);
    }

    #[test]
    fn opens_when_the_failure_window_fills() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        breaker.mark_failed("boom 1");
        breaker.mark_failed("boom 2");
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.mark_failed("boom 3");

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.request_allowed());
        assert_eq!(breaker.last_error().as_deref(), Some("boom 3"));
    }

    #[test]
    fn spread_out_failures_do_not_trip_the_circuit() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        breaker.mark_failed("a");
        control.advance(Duration::from_secs(7));
        breaker.mark_failed("b");
        // The first failure ages out of the 20s window before the third lands.
        control.advance(Duration::from_secs(15));
        breaker.mark_failed("c");

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().window_failures, 2);
    }

    #[test]
    fn half_open_after_error_timeout_then_closes_on_successes() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        for _ in 0..3 {
            breaker.mark_failed("down");
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.mark_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.mark_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        for _ in 0..3 {
            breaker.mark_failed("down");
        }
        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());

        breaker.mark_failed("still down");

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.request_allowed());
    }

    #[test]
    fn success_counter_restarts_after_a_probe_failure() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        for _ in 0..3 {
            breaker.mark_failed("down");
        }
        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());
        breaker.mark_success();
        breaker.mark_failed("relapse");

        // Open again; wait out the timeout and probe anew. One earlier success
        // must not count.
        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());
        breaker.mark_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.mark_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn closed_successes_are_a_no_op() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        breaker.mark_success();
        breaker.mark_failed("one");
        breaker.mark_success();
        breaker.mark_failed("two");
        breaker.mark_failed("three");

        // Successes in the closed state neither clear failures nor delay the trip.
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn lumped_failures_count_as_one_incident() {
        let control = ClockControl::new();
        let options = ClassicOptions::builder()
            .error_threshold(3)
            .error_threshold_timeout(Duration::from_secs(20))
            .error_timeout(Duration::from_secs(15))
            .success_threshold(2)
            .lumping_interval(Duration::from_secs(7))
            .build()
            .expect("valid options");
        let breaker = ClassicBreaker::new(&control.to_clock(), options);

        // A burst within one lumping interval is one incident.
        breaker.mark_failed("burst 1");
        breaker.mark_failed("burst 2");
        breaker.mark_failed("burst 3");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().window_failures, 1);

        // Failures spaced exactly one interval apart are distinct incidents.
        control.advance(Duration::from_secs(7));
        breaker.mark_failed("second incident");
        control.advance(Duration::from_secs(7));
        breaker.mark_failed("third incident");

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed_and_clears_state() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        for _ in 0..3 {
            breaker.mark_failed("down");
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.request_allowed());
        assert!(!breaker.in_use());
        assert_eq!(breaker.last_error(), None);
        assert_eq!(breaker.metrics().window_failures, 0);
    }

    #[test]
    fn in_use_reflects_window_contents() {
        let control = ClockControl::new();
        let breaker = breaker(&control);

        breaker.mark_failed("one");
        assert!(breaker.in_use());

        // The failure ages out of the window.
        control.advance(Duration::from_secs(21));
        assert!(!breaker.in_use());
    }

    #[test]
    fn half_open_resource_timeout_only_while_probing() {
        let control = ClockControl::new();
        let options = ClassicOptions::builder()
            .error_threshold(1)
            .error_timeout(Duration::from_secs(15))
            .success_threshold(1)
            .half_open_resource_timeout(Duration::from_millis(500))
            .build()
            .expect("valid options");
        let breaker = ClassicBreaker::new(&control.to_clock(), options);

        assert_eq!(breaker.half_open_resource_timeout(), None);

        breaker.mark_failed("down");
        assert_eq!(breaker.half_open_resource_timeout(), None);

        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());
        assert_eq!(breaker.half_open_resource_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn observer_sees_every_transition() {
        let control = ClockControl::new();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let transitions_clone = Arc::clone(&transitions);
        let breaker = ClassicBreaker::new(&control.to_clock(), options()).on_state_change(move |state| {
            transitions_clone.lock().expect("observer lock").push(state);
        });

        for _ in 0..3 {
            breaker.mark_failed("down");
        }
        control.advance(Duration::from_secs(15));
        assert!(breaker.request_allowed());
        breaker.mark_success();
        breaker.mark_success();

        assert_eq!(
            *transitions.lock().expect("observer lock"),
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[test]
    fn concurrent_failures_never_overfill_the_window() {
        let control = ClockControl::new();
        let breaker = Arc::new(breaker(&control));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        breaker.mark_failed("hammer");
                        let failures = breaker.metrics().window_failures;
                        max_seen.fetch_max(failures, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
