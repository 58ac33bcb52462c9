// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Configuration for protected resources.
//!
//! All options are plain data validated before anything is constructed from them:
//! [`ResourceOptions::validate`] runs at registration and rejects misuse with
//! [`OptionsError`], so a breaker never exists in a half-configured state.
//!
//! The `serde` feature derives `Serialize`/`Deserialize` on every options type, so
//! configurations can live in files; validation still runs on the deserialized
//! values at registration.

use std::num::NonZero;
use std::time::Duration;

use crate::ResourceName;
use crate::constants::{
    DEFAULT_ALPHA_HIGH_DOWN, DEFAULT_ALPHA_HIGH_UP, DEFAULT_ALPHA_LOW_DOWN, DEFAULT_ALPHA_LOW_UP,
    DEFAULT_BASELINE_QUANTILE, DEFAULT_BULKHEAD_TIMEOUT, DEFAULT_CONFIDENCE_OBSERVATIONS, DEFAULT_IDLE_WINDOW,
    DEFAULT_INITIAL_ERROR_RATE, DEFAULT_KD, DEFAULT_KI, DEFAULT_KP, DEFAULT_SMOOTHER_CAP, DEFAULT_WINDOW,
};
use crate::error::OptionsError;

/// Configuration of a classic three-state circuit breaker.
///
/// Built through [`ClassicOptions::builder`]; `error_threshold`, `error_timeout`,
/// and `success_threshold` are required.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fusebox::options::ClassicOptions;
///
/// let options = ClassicOptions::builder()
///     .error_threshold(3)
///     .error_timeout(Duration::from_secs(15))
///     .success_threshold(2)
///     .build()?;
///
/// assert_eq!(options.error_threshold().get(), 3);
/// # Ok::<(), fusebox::OptionsError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassicOptions {
    pub(crate) error_threshold: NonZero<u32>,
    pub(crate) error_threshold_timeout: Duration,
    pub(crate) error_timeout: Duration,
    pub(crate) success_threshold: NonZero<u32>,
    pub(crate) half_open_resource_timeout: Option<Duration>,
    pub(crate) lumping_interval: Option<Duration>,
}

impl ClassicOptions {
    /// Starts building classic breaker options.
    #[must_use]
    pub fn builder() -> ClassicOptionsBuilder {
        ClassicOptionsBuilder::default()
    }

    /// Number of failures that fills the window and opens the circuit.
    #[must_use]
    pub fn error_threshold(&self) -> NonZero<u32> {
        self.error_threshold
    }

    /// Failures older than this are forgotten.
    #[must_use]
    pub fn error_threshold_timeout(&self) -> Duration {
        self.error_threshold_timeout
    }

    /// How long the circuit stays open before the half-open probe.
    #[must_use]
    pub fn error_timeout(&self) -> Duration {
        self.error_timeout
    }

    /// Consecutive successes required to close from half-open.
    #[must_use]
    pub fn success_threshold(&self) -> NonZero<u32> {
        self.success_threshold
    }

    /// Reduced timeout applied to the trial call while half-open.
    #[must_use]
    pub fn half_open_resource_timeout(&self) -> Option<Duration> {
        self.half_open_resource_timeout
    }

    /// Failures closer together than this count as one incident.
    #[must_use]
    pub fn lumping_interval(&self) -> Option<Duration> {
        self.lumping_interval
    }

    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        require_positive("error_timeout", self.error_timeout)?;
        require_positive("error_threshold_timeout", self.error_threshold_timeout)?;
        if let Some(timeout) = self.half_open_resource_timeout {
            require_positive("half_open_resource_timeout", timeout)?;
        }
        if let Some(lumping) = self.lumping_interval {
            require_positive("lumping_interval", lumping)?;

            let spread = lumping.checked_mul(self.error_threshold.get() - 1);
            if spread.is_none_or(|spread| spread > self.error_threshold_timeout) {
                return Err(OptionsError::LumpingTooCoarse {
                    lumping,
                    threshold: self.error_threshold.get(),
                    timeout: self.error_threshold_timeout,
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`ClassicOptions`].
#[derive(Debug, Clone, Default)]
pub struct ClassicOptionsBuilder {
    error_threshold: Option<u32>,
    error_threshold_timeout: Option<Duration>,
    error_timeout: Option<Duration>,
    success_threshold: Option<u32>,
    half_open_resource_timeout: Option<Duration>,
    lumping_interval: Option<Duration>,
}

impl ClassicOptionsBuilder {
    /// Number of failures that fills the window and opens the circuit. Required.
    #[must_use]
    pub fn error_threshold(mut self, failures: u32) -> Self {
        self.error_threshold = Some(failures);
        self
    }

    /// Span beyond which old failures are forgotten. Defaults to `error_timeout`.
    #[must_use]
    pub fn error_threshold_timeout(mut self, timeout: Duration) -> Self {
        self.error_threshold_timeout = Some(timeout);
        self
    }

    /// How long the circuit stays open before the half-open probe. Required.
    #[must_use]
    pub fn error_timeout(mut self, timeout: Duration) -> Self {
        self.error_timeout = Some(timeout);
        self
    }

    /// Consecutive successes required to close from half-open. Required.
    #[must_use]
    pub fn success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = Some(successes);
        self
    }

    /// Reduced timeout for the trial call while half-open.
    #[must_use]
    pub fn half_open_resource_timeout(mut self, timeout: Duration) -> Self {
        self.half_open_resource_timeout = Some(timeout);
        self
    }

    /// Failures closer together than this count as one incident.
    #[must_use]
    pub fn lumping_interval(mut self, interval: Duration) -> Self {
        self.lumping_interval = Some(interval);
        self
    }

    /// Validates and produces the options.
    pub fn build(self) -> Result<ClassicOptions, OptionsError> {
        let error_threshold = NonZero::new(self.error_threshold.ok_or(OptionsError::Missing("error_threshold"))?)
            .ok_or(OptionsError::NotPositive("error_threshold"))?;
        let success_threshold = NonZero::new(self.success_threshold.ok_or(OptionsError::Missing("success_threshold"))?)
            .ok_or(OptionsError::NotPositive("success_threshold"))?;
        let error_timeout = self.error_timeout.ok_or(OptionsError::Missing("error_timeout"))?;

        let options = ClassicOptions {
            error_threshold,
            error_threshold_timeout: self.error_threshold_timeout.unwrap_or(error_timeout),
            error_timeout,
            success_threshold,
            half_open_resource_timeout: self.half_open_resource_timeout,
            lumping_interval: self.lumping_interval,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Configuration of the adaptive (controller-based) circuit breaker.
///
/// All fields have defaults; tweak them with the `with_*` methods.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fusebox::options::AdaptiveOptions;
///
/// let options = AdaptiveOptions::default()
///     .with_window(Duration::from_secs(5))
///     .with_gains(0.8, 0.05, 0.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdaptiveOptions {
    pub(crate) window: Duration,
    pub(crate) kp: f64,
    pub(crate) ki: f64,
    pub(crate) kd: f64,
    pub(crate) initial_error_rate: f64,
    pub(crate) baseline: BaselineOptions,
    pub(crate) idle_window: Duration,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
            initial_error_rate: DEFAULT_INITIAL_ERROR_RATE,
            baseline: BaselineOptions::default(),
            idle_window: DEFAULT_IDLE_WINDOW,
        }
    }
}

impl AdaptiveOptions {
    /// Length of one controller window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Proportional, integral, and derivative gains.
    #[must_use]
    pub fn with_gains(mut self, kp: f64, ki: f64, kd: f64) -> Self {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self
    }

    /// Baseline error rate assumed before any window has been observed.
    #[must_use]
    pub fn with_initial_error_rate(mut self, rate: f64) -> Self {
        self.initial_error_rate = rate;
        self
    }

    /// Baseline estimator selection.
    #[must_use]
    pub fn with_baseline(mut self, baseline: BaselineOptions) -> Self {
        self.baseline = baseline;
        self
    }

    /// How long a request counts toward recent activity.
    #[must_use]
    pub fn with_idle_window(mut self, idle_window: Duration) -> Self {
        self.idle_window = idle_window;
        self
    }

    /// Length of one controller window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        require_positive("window", self.window)?;
        require_positive("idle_window", self.idle_window)?;
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(OptionsError::OutOfRange {
                    name,
                    range: "[0, ∞)",
                    value: gain,
                });
            }
        }
        if !(0.0..=1.0).contains(&self.initial_error_rate) {
            return Err(OptionsError::OutOfRange {
                name: "initial_error_rate",
                range: "[0, 1]",
                value: self.initial_error_rate,
            });
        }
        self.baseline.validate()
    }
}

/// Which estimator provides the adaptive controller's baseline error rate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BaselineOptions {
    /// Track a quantile of the windowed error rates.
    Quantile {
        /// The tracked quantile, in `(0, 1)`.
        q: f64,
    },

    /// Exponentially smooth the windowed error rates.
    Smoothing(SmootherOptions),
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self::Smoothing(SmootherOptions::default())
    }
}

impl BaselineOptions {
    /// The default quantile configuration.
    #[must_use]
    pub fn quantile() -> Self {
        Self::Quantile {
            q: DEFAULT_BASELINE_QUANTILE,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        match self {
            Self::Quantile { q } => {
                if !(q.is_finite() && *q > 0.0 && *q < 1.0) {
                    return Err(OptionsError::OutOfRange {
                        name: "q",
                        range: "(0, 1)",
                        value: *q,
                    });
                }
                Ok(())
            }
            Self::Smoothing(smoother) => smoother.validate(),
        }
    }
}

/// Tuning of the exponential smoother baseline.
///
/// The four smoothing factors must lie in `(0, 0.5)`. By convention the
/// high-confidence factors are half the low-confidence ones, and the downward
/// factors exceed the upward ones so the baseline recovers faster than it rises;
/// the defaults follow both conventions but neither is enforced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmootherOptions {
    /// Factor for upward moves before the estimate is trusted.
    pub alpha_low_up: f64,
    /// Factor for downward moves before the estimate is trusted.
    pub alpha_low_down: f64,
    /// Factor for upward moves once the estimate is trusted.
    pub alpha_high_up: f64,
    /// Factor for downward moves once the estimate is trusted.
    pub alpha_high_down: f64,
    /// Observations above this value are dropped, not clamped.
    pub cap: f64,
    /// Observations after which the estimate is considered trustworthy.
    pub confidence_after: u64,
}

impl Default for SmootherOptions {
    fn default() -> Self {
        Self {
            alpha_low_up: DEFAULT_ALPHA_LOW_UP,
            alpha_low_down: DEFAULT_ALPHA_LOW_DOWN,
            alpha_high_up: DEFAULT_ALPHA_HIGH_UP,
            alpha_high_down: DEFAULT_ALPHA_HIGH_DOWN,
            cap: DEFAULT_SMOOTHER_CAP,
            confidence_after: DEFAULT_CONFIDENCE_OBSERVATIONS,
        }
    }
}

impl SmootherOptions {
    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        for (name, alpha) in [
            ("alpha_low_up", self.alpha_low_up),
            ("alpha_low_down", self.alpha_low_down),
            ("alpha_high_up", self.alpha_high_up),
            ("alpha_high_down", self.alpha_high_down),
        ] {
            if !(alpha.is_finite() && alpha > 0.0 && alpha < 0.5) {
                return Err(OptionsError::OutOfRange {
                    name,
                    range: "(0, 0.5)",
                    value: alpha,
                });
            }
        }
        if !(self.cap.is_finite() && self.cap > 0.0) {
            return Err(OptionsError::OutOfRange {
                name: "cap",
                range: "(0, ∞)",
                value: self.cap,
            });
        }
        Ok(())
    }
}

/// Which breaker protects a resource.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BreakerChoice {
    /// The classic three-state breaker.
    Classic(ClassicOptions),

    /// The adaptive controller-based breaker.
    Adaptive(AdaptiveOptions),

    /// Both breakers side by side, routed per call by the engine's selector.
    Dual {
        /// Options for the classic child.
        classic: ClassicOptions,
        /// Options for the adaptive child.
        adaptive: AdaptiveOptions,
    },

    /// No breaker: every request is allowed.
    Unprotected,
}

impl BreakerChoice {
    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        match self {
            Self::Classic(classic) => classic.validate(),
            Self::Adaptive(adaptive) => adaptive.validate(),
            Self::Dual { classic, adaptive } => {
                classic.validate()?;
                adaptive.validate()
            }
            Self::Unprotected => Ok(()),
        }
    }
}

/// Configuration of one protected resource: breaker choice plus bulkhead sizing.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use fusebox::options::{ClassicOptions, ResourceOptions};
///
/// let classic = ClassicOptions::builder()
///     .error_threshold(3)
///     .error_timeout(Duration::from_secs(15))
///     .success_threshold(2)
///     .build()?;
///
/// let options = ResourceOptions::classic(classic)
///     .with_tickets(4)
///     .with_acquire_timeout(Duration::from_millis(100));
///
/// options.validate()?;
/// # Ok::<(), fusebox::OptionsError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceOptions {
    pub(crate) name: Option<ResourceName>,
    pub(crate) breaker: BreakerChoice,
    pub(crate) bulkhead: bool,
    pub(crate) tickets: Option<u32>,
    pub(crate) quota: Option<f64>,
    pub(crate) acquire_timeout: Duration,
}

impl ResourceOptions {
    fn new(breaker: BreakerChoice) -> Self {
        Self {
            name: None,
            breaker,
            bulkhead: true,
            tickets: None,
            quota: None,
            acquire_timeout: DEFAULT_BULKHEAD_TIMEOUT,
        }
    }

    /// Protect the resource with a classic breaker.
    #[must_use]
    pub fn classic(options: ClassicOptions) -> Self {
        Self::new(BreakerChoice::Classic(options))
    }

    /// Protect the resource with an adaptive breaker.
    #[must_use]
    pub fn adaptive(options: AdaptiveOptions) -> Self {
        Self::new(BreakerChoice::Adaptive(options))
    }

    /// Run a classic and an adaptive breaker side by side.
    #[must_use]
    pub fn dual(classic: ClassicOptions, adaptive: AdaptiveOptions) -> Self {
        Self::new(BreakerChoice::Dual { classic, adaptive })
    }

    /// No breaker at all; useful for bulkhead-only protection.
    #[must_use]
    pub fn unprotected() -> Self {
        Self::new(BreakerChoice::Unprotected)
    }

    /// Overrides the symbolic name the resource registers under.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<ResourceName>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sizes the bulkhead with a fixed ticket count.
    #[must_use]
    pub fn with_tickets(mut self, tickets: u32) -> Self {
        self.tickets = Some(tickets);
        self
    }

    /// Sizes the bulkhead as a fraction of the engine's worker count.
    #[must_use]
    pub fn with_quota(mut self, quota: f64) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Detaches the bulkhead entirely.
    #[must_use]
    pub fn without_bulkhead(mut self) -> Self {
        self.bulkhead = false;
        self
    }

    /// Default wait for a bulkhead slot before failing fast.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Checks the whole configuration, rejecting misuse before construction.
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.breaker.validate()?;

        if self.bulkhead {
            match (self.tickets, self.quota) {
                (Some(_), Some(_)) => return Err(OptionsError::AmbiguousBulkheadSize),
                (None, None) => return Err(OptionsError::Missing("tickets or quota")),
                (Some(tickets), None) => {
                    if tickets == 0 {
                        return Err(OptionsError::NotPositive("tickets"));
                    }
                }
                (None, Some(quota)) => {
                    if !(quota.is_finite() && quota > 0.0 && quota <= 1.0) {
                        return Err(OptionsError::OutOfRange {
                            name: "quota",
                            range: "(0, 1]",
                            value: quota,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn require_positive(name: &'static str, duration: Duration) -> Result<(), OptionsError> {
    if duration.is_zero() {
        return Err(OptionsError::NotPositive(name));
    }
    Ok(())
}
