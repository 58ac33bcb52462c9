// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use crate::options::SmootherOptions;

/// Simple exponential smoothing with asymmetric smoothing factors.
///
/// The smoother keeps one value, the current baseline, and folds each observation
/// into it with a factor chosen by two criteria:
///
/// - **direction**: downward moves use a larger factor than upward moves, so the
///   baseline recovers quickly after an incident but a one-off spike cannot drag
///   it up;
/// - **confidence**: once enough observations have been folded in, the factors are
///   halved and the estimate stabilizes.
///
/// Observations strictly greater than the configured cap are dropped entirely
/// rather than clamped: an extreme spike must not move the baseline at all.
///
/// # Examples
///
/// ```
/// use fusebox::estimator::ExpSmoother;
/// use fusebox::options::SmootherOptions;
///
/// let mut smoother = ExpSmoother::new(&SmootherOptions::default(), 0.01);
/// smoother.observe(0.03);
///
/// let forecast = smoother.forecast();
/// assert!(forecast > 0.01 && forecast < 0.03);
/// ```
#[derive(Debug, Clone)]
pub struct ExpSmoother {
    value: f64,
    initial: f64,
    observations: u64,
    options: SmootherOptions,
}

impl ExpSmoother {
    /// Creates a smoother starting at `initial` with validated options.
    #[must_use]
    pub fn new(options: &SmootherOptions, initial: f64) -> Self {
        Self {
            value: initial,
            initial,
            observations: 0,
            options: options.clone(),
        }
    }

    /// Folds one observation into the baseline.
    ///
    /// Observations above the cap are dropped and do not count toward confidence.
    pub fn observe(&mut self, observation: f64) {
        if observation > self.options.cap {
            return;
        }

        let alpha = self.select_alpha(observation);
        self.value = alpha * observation + (1.0 - alpha) * self.value;
        self.observations += 1;
    }

    /// The current smoothed baseline.
    #[must_use]
    pub fn forecast(&self) -> f64 {
        self.value
    }

    /// The number of observations folded in so far.
    #[must_use]
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Restores the initial baseline and discards all confidence.
    pub fn reset(&mut self) {
        self.value = self.initial;
        self.observations = 0;
    }

    fn select_alpha(&self, observation: f64) -> f64 {
        let confident = self.observations >= self.options.confidence_after;
        let upward = observation > self.value;

        match (confident, upward) {
            (false, true) => self.options.alpha_low_up,
            (false, false) => self.options.alpha_low_down,
            (true, true) => self.options.alpha_high_up,
            (true, false) => self.options.alpha_high_down,
        }
    }
}
