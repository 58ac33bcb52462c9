// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

//! Streaming baseline estimators.
//!
//! The adaptive controller compares each window's observed error rate against the
//! resource's *natural* background error rate, so a service that always fails 2% of
//! requests is not punished for it. Two estimators provide that baseline:
//!
//! - [`P2Quantile`]: the P² streaming quantile estimator. O(1) space, no stored
//!   samples, tracks a configurable quantile of everything it has seen.
//! - [`ExpSmoother`]: simple exponential smoothing with asymmetric factors, so the
//!   baseline falls faster than it rises and one-off spikes are dropped outright.
//!
//! [`Baseline`] is the tagged dispatch between the two.

mod p2;
mod smoother;

pub use p2::P2Quantile;
pub use smoother::ExpSmoother;

use crate::options::BaselineOptions;

/// An estimator produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum EstimatorError {
    /// The estimator has not observed any data yet.
    #[error("no observations recorded")]
    NoData,
}

/// The baseline estimator driving the adaptive controller's notion of "normal".
///
/// A tagged variant rather than a trait object: there are exactly two estimators and
/// the controller needs `Clone` for metric snapshots.
#[derive(Debug, Clone)]
pub enum Baseline {
    /// Track a quantile of the observed error rates.
    Quantile {
        /// The underlying streaming estimator.
        estimator: P2Quantile,
        /// Forecast reported until the estimator has data.
        initial: f64,
    },

    /// Exponentially smooth the observed error rates.
    Smoothing(ExpSmoother),
}

impl Baseline {
    /// Builds the estimator described by validated options.
    #[must_use]
    pub fn from_options(options: &BaselineOptions, initial: f64) -> Self {
        match options {
            BaselineOptions::Quantile { q } => Self::Quantile {
                estimator: P2Quantile::new(*q),
                initial,
            },
            BaselineOptions::Smoothing(smoother) => Self::Smoothing(ExpSmoother::new(smoother, initial)),
        }
    }

    /// Feeds one windowed error-rate observation.
    pub fn observe(&mut self, value: f64) {
        match self {
            Self::Quantile { estimator, .. } => estimator.observe(value),
            Self::Smoothing(smoother) => smoother.observe(value),
        }
    }

    /// The current baseline forecast.
    #[must_use]
    pub fn forecast(&self) -> f64 {
        match self {
            Self::Quantile { estimator, initial } => estimator.estimate().unwrap_or(*initial),
            Self::Smoothing(smoother) => smoother.forecast(),
        }
    }

    /// Discards all learned state.
    pub fn reset(&mut self) {
        match self {
            Self::Quantile { estimator, .. } => estimator.reset(),
            Self::Smoothing(smoother) => smoother.reset(),
        }
    }
}
