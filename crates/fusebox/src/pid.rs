// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! The windowed controller that converts error rates into a rejection probability.
//!
//! Unlike the classic breaker's binary open/closed decision, the controller produces
//! a continuous `rejection_rate` in `[0, 1]`: the probability that the next request
//! is shed. Once per window it compares the observed error rate against the
//! resource's baseline error rate and moves the rejection rate with a standard
//! proportional-integral-derivative step.
//!
//! Two details keep the loop stable:
//!
//! - The feedback term subtracts the current rejection rate from the error signal,
//!   so once the controller is rejecting, the signal falls even before the upstream
//!   recovers; full rejection is never a fixed point.
//! - When the rejection rate saturates at either bound, the integral accumulation of
//!   that tick is backed out, so the controller does not wind up against the clamp
//!   and can leave saturation immediately.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::constants::ERR_POISONED_LOCK;
use crate::estimator::Baseline;
use crate::options::AdaptiveOptions;
use crate::rnd::Rnd;

/// The recorded outcome of one protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The call completed and the dependency answered.
    Success,

    /// The call failed with a fault blamed on the dependency.
    Error,

    /// The breaker shed the call without attempting it.
    Rejected,
}

/// A point-in-time view of a controller's state.
///
/// Snapshots taken from [`SharedPidController::metrics`] are read without locking
/// and may be momentarily inconsistent with each other (for example, a counter from
/// the current window combined with a rejection rate from the previous one).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidMetrics {
    /// Probability that the next request is shed.
    pub rejection_rate: f64,
    /// Accumulated integral term.
    pub integral: f64,
    /// The baseline estimator's current forecast.
    pub baseline: f64,
    /// Successes recorded in the current window.
    pub successes: u64,
    /// Dependency faults recorded in the current window.
    pub errors: u64,
    /// Requests shed in the current window.
    pub rejected: u64,
}

/// Converts windowed error rates into a rejection probability.
///
/// The controller is driven externally: callers [`record`][Self::record] outcomes as
/// they happen and invoke [`update`][Self::update] at each window boundary. This
/// type provides no interior locking; [`SharedPidController`] serializes access for
/// concurrent use.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    window: Duration,
    rejection_rate: f64,
    integral: f64,
    previous_p: f64,
    successes: u64,
    errors: u64,
    rejected: u64,
    baseline: Baseline,
}

impl PidController {
    /// Creates a controller from validated options.
    #[must_use]
    pub fn new(options: &AdaptiveOptions) -> Self {
        Self {
            kp: options.kp,
            ki: options.ki,
            kd: options.kd,
            window: options.window,
            rejection_rate: 0.0,
            integral: 0.0,
            previous_p: 0.0,
            successes: 0,
            errors: 0,
            rejected: 0,
            baseline: Baseline::from_options(&options.baseline, options.initial_error_rate),
        }
    }

    /// Counts one outcome toward the current window.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Error => self.errors += 1,
            Outcome::Rejected => self.rejected += 1,
        }
    }

    /// Runs one controller tick and starts a fresh window.
    pub fn update(&mut self) {
        let attempts = self.successes + self.errors;

        #[expect(clippy::cast_precision_loss, reason = "window counters are far below 2^52")]
        let error_rate = if attempts == 0 {
            0.0
        } else {
            self.errors as f64 / attempts as f64
        };

        self.baseline.observe(error_rate);
        let ideal = self.baseline.forecast();

        let w = self.window.as_secs_f64();
        let p = (error_rate - ideal) - self.rejection_rate;
        self.integral += p * w;
        let derivative = (p - self.previous_p) / w;

        let delta = self.kp * p + self.ki * self.integral + self.kd * derivative;
        let unclamped = self.rejection_rate + delta;
        self.rejection_rate = unclamped.clamp(0.0, 1.0);
        if unclamped < 0.0 || unclamped > 1.0 {
            // The output saturated; undo this tick's accumulation so the integral
            // does not wind up against the clamp.
            self.integral -= p * w;
        }

        self.successes = 0;
        self.errors = 0;
        self.rejected = 0;
        self.previous_p = p;
    }

    /// One Bernoulli trial against the current rejection rate.
    #[must_use]
    pub fn should_reject(&self, rnd: &Rnd) -> bool {
        rnd.sample() < self.rejection_rate
    }

    /// Probability that the next request is shed.
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        self.rejection_rate
    }

    /// Returns to the pristine state: no rejection, no integral, fresh baseline.
    pub fn reset(&mut self) {
        self.rejection_rate = 0.0;
        self.integral = 0.0;
        self.previous_p = 0.0;
        self.successes = 0;
        self.errors = 0;
        self.rejected = 0;
        self.baseline.reset();
    }

    /// The current state as a snapshot.
    #[must_use]
    pub fn metrics(&self) -> PidMetrics {
        PidMetrics {
            rejection_rate: self.rejection_rate,
            integral: self.integral,
            baseline: self.baseline.forecast(),
            successes: self.successes,
            errors: self.errors,
            rejected: self.rejected,
        }
    }
}

/// A [`PidController`] shared across threads.
///
/// `record`, `update`, `should_reject`, and `reset` are serialized under one lock.
/// [`metrics`][Self::metrics] deliberately bypasses the lock and reads from atomic
/// cells refreshed after every mutation, so observability never contends with the
/// hot path; the snapshot may be momentarily inconsistent.
#[derive(Debug)]
pub struct SharedPidController {
    inner: Mutex<Inner>,
    published: PublishedMetrics,
}

#[derive(Debug)]
struct Inner {
    controller: PidController,
    next_update: Option<Instant>,
}

#[derive(Debug, Default)]
struct PublishedMetrics {
    rejection_rate: AtomicU64,
    integral: AtomicU64,
    baseline: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    rejected: AtomicU64,
}

impl PublishedMetrics {
    fn publish(&self, metrics: &PidMetrics) {
        self.rejection_rate.store(metrics.rejection_rate.to_bits(), Ordering::Release);
        self.integral.store(metrics.integral.to_bits(), Ordering::Release);
        self.baseline.store(metrics.baseline.to_bits(), Ordering::Release);
        self.successes.store(metrics.successes, Ordering::Release);
        self.errors.store(metrics.errors, Ordering::Release);
        self.rejected.store(metrics.rejected, Ordering::Release);
    }

    fn read(&self) -> PidMetrics {
        PidMetrics {
            rejection_rate: f64::from_bits(self.rejection_rate.load(Ordering::Acquire)),
            integral: f64::from_bits(self.integral.load(Ordering::Acquire)),
            baseline: f64::from_bits(self.baseline.load(Ordering::Acquire)),
            successes: self.successes.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}

impl SharedPidController {
    /// Creates a shared controller from validated options.
    #[must_use]
    pub fn new(options: &AdaptiveOptions) -> Self {
        let controller = PidController::new(options);
        let published = PublishedMetrics::default();
        published.publish(&controller.metrics());

        Self {
            inner: Mutex::new(Inner {
                controller,
                next_update: None,
            }),
            published,
        }
    }

    /// Counts one outcome toward the current window.
    pub fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        inner.controller.record(outcome);
        self.published.publish(&inner.controller.metrics());
    }

    /// Runs one controller tick unconditionally.
    pub fn update(&self) {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        inner.controller.update();
        self.published.publish(&inner.controller.metrics());
    }

    /// Runs a tick if the current window has elapsed; returns whether it did.
    ///
    /// The scheduler calls this more often than the window length; the first call
    /// anchors the window grid at `now`.
    pub fn maybe_update(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        let window = inner.controller.window;

        match inner.next_update {
            None => {
                inner.next_update = now.checked_add(window);
                false
            }
            Some(deadline) if now >= deadline => {
                inner.controller.update();
                inner.next_update = now.checked_add(window);
                self.published.publish(&inner.controller.metrics());
                true
            }
            Some(_) => false,
        }
    }

    /// One Bernoulli trial against the current rejection rate.
    #[must_use]
    pub fn should_reject(&self, rnd: &Rnd) -> bool {
        let inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        inner.controller.should_reject(rnd)
    }

    /// Probability that the next request is shed.
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        f64::from_bits(self.published.rejection_rate.load(Ordering::Acquire))
    }

    /// Returns to the pristine state: no rejection, no integral, fresh baseline.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        inner.controller.reset();
        inner.next_update = None;
        self.published.publish(&inner.controller.metrics());
    }

    /// The current state, read without locking.
    #[must_use]
    pub fn metrics(&self) -> PidMetrics {
        self.published.read()
    }
}
