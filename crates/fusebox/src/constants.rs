// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::num::NonZero;
use std::time::Duration;

use new_zealand::nz;

/// Default length of one adaptive controller window.
pub(crate) const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Default proportional gain of the adaptive controller.
pub(crate) const DEFAULT_KP: f64 = 1.0;

/// Default integral gain of the adaptive controller.
pub(crate) const DEFAULT_KI: f64 = 0.1;

/// Default derivative gain of the adaptive controller.
pub(crate) const DEFAULT_KD: f64 = 0.01;

/// Baseline error rate assumed before any window has been observed.
pub(crate) const DEFAULT_INITIAL_ERROR_RATE: f64 = 0.01;

/// Error-rate observations above this value are dropped from the baseline.
pub(crate) const DEFAULT_SMOOTHER_CAP: f64 = 0.1;

/// Smoothing factor for upward moves before the estimate is trusted.
pub(crate) const DEFAULT_ALPHA_LOW_UP: f64 = 0.10;

/// Smoothing factor for downward moves before the estimate is trusted.
pub(crate) const DEFAULT_ALPHA_LOW_DOWN: f64 = 0.20;

/// Smoothing factor for upward moves once the estimate is trusted.
pub(crate) const DEFAULT_ALPHA_HIGH_UP: f64 = 0.05;

/// Smoothing factor for downward moves once the estimate is trusted.
pub(crate) const DEFAULT_ALPHA_HIGH_DOWN: f64 = 0.10;

/// Observations after which the smoothed estimate is considered trustworthy.
/// Thirty minutes of observations at one per default window.
pub(crate) const DEFAULT_CONFIDENCE_OBSERVATIONS: u64 = 180;

/// Default quantile tracked when the baseline uses the streaming quantile estimator.
pub(crate) const DEFAULT_BASELINE_QUANTILE: f64 = 0.9;

/// How long an adaptive breaker counts a request toward recent activity.
pub(crate) const DEFAULT_IDLE_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound on the number of request instants retained for activity tracking.
pub(crate) const DEFAULT_IDLE_WINDOW_CAPACITY: NonZero<usize> = nz!(256);

/// Default interval between scheduler wake-ups driving adaptive controller updates.
pub(crate) const DEFAULT_SLIDING_INTERVAL: Duration = Duration::from_secs(1);

/// Default upper bound on registry size before garbage collection kicks in.
pub(crate) const DEFAULT_REGISTRY_MAX_SIZE: usize = 500;

/// Registry entries younger than this are never evicted.
pub(crate) const DEFAULT_REGISTRY_MIN_AGE: Duration = Duration::from_secs(300);

/// Default time a caller waits for a bulkhead slot before failing fast.
pub(crate) const DEFAULT_BULKHEAD_TIMEOUT: Duration = Duration::ZERO;

pub(crate) const ERR_POISONED_LOCK: &str =
    "poisoned lock - cannot continue execution because consistency guarantees can no longer be upheld";
