// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use super::EstimatorError;

/// Streaming quantile estimation with constant space (the P² algorithm).
///
/// The estimator maintains five markers tracking the minimum, the `q/2`, `q`, and
/// `(1+q)/2` quantiles, and the maximum of everything observed so far. Each new
/// observation nudges the interior markers toward their desired positions with a
/// parabolic fit, falling back to linear interpolation when the parabola would break
/// marker ordering. Memory and per-observation cost are both O(1) regardless of how
/// many values have been observed.
///
/// For fewer than five observations the raw values are stored and
/// [`estimate`][Self::estimate] returns an exact order statistic.
///
/// # Examples
///
/// ```
/// use fusebox::estimator::P2Quantile;
///
/// let mut median = P2Quantile::new(0.5);
/// for value in [5.0, 1.0, 4.0, 2.0, 3.0] {
///     median.observe(value);
/// }
///
/// assert_eq!(median.estimate().unwrap(), 3.0);
/// ```
#[derive(Debug, Clone)]
pub struct P2Quantile {
    q: f64,
    /// Marker heights: current estimates of min, q/2, q, (1+q)/2, max.
    heights: [f64; 5],
    /// Actual marker positions (integral values, kept as f64 for the arithmetic).
    positions: [f64; 5],
    /// Desired marker positions.
    desired: [f64; 5],
    /// Per-observation growth of the desired positions.
    increments: [f64; 5],
    count: usize,
}

impl P2Quantile {
    /// Creates an estimator tracking the `q`-quantile, `q` in `(0, 1)`.
    ///
    /// Callers validate `q`; construction from configuration goes through
    /// [`OptionsError`][crate::OptionsError] checks first.
    #[must_use]
    pub fn new(q: f64) -> Self {
        debug_assert!(q > 0.0 && q < 1.0, "quantile out of range");

        Self {
            q,
            heights: [0.0; 5],
            positions: [0.0, 1.0, 2.0, 3.0, 4.0],
            desired: Self::initial_desired(q),
            increments: [0.0, q / 2.0, q, (1.0 + q) / 2.0, 1.0],
            count: 0,
        }
    }

    fn initial_desired(q: f64) -> [f64; 5] {
        [0.0, 2.0 * q, 4.0 * q, 2.0 + 2.0 * q, 4.0]
    }

    /// The tracked quantile.
    #[must_use]
    pub fn quantile(&self) -> f64 {
        self.q
    }

    /// The number of observations so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether nothing has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Feeds one observation.
    pub fn observe(&mut self, value: f64) {
        if self.count < 5 {
            self.heights[self.count] = value;
            self.count += 1;
            if self.count == 5 {
                self.heights.sort_by(f64::total_cmp);
            }
            return;
        }

        let cell = self.locate_cell(value);

        for i in (cell + 1)..5 {
            self.positions[i] += 1.0;
        }
        for i in 0..5 {
            self.desired[i] += self.increments[i];
        }
        self.count += 1;

        for i in 1..4 {
            self.adjust_marker(i);
        }
    }

    /// Returns the current estimate of the `q`-quantile.
    ///
    /// For fewer than five observations this is an exact order statistic of the
    /// values seen so far.
    pub fn estimate(&self) -> Result<f64, EstimatorError> {
        match self.count {
            0 => Err(EstimatorError::NoData),
            n if n < 5 => {
                let mut sorted = self.heights[..n].to_vec();
                sorted.sort_by(f64::total_cmp);

                #[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation, reason = "q in (0,1), n < 5")]
                let rank = (self.q * n as f64).ceil() as usize;
                Ok(sorted[rank.saturating_sub(1).min(n - 1)])
            }
            _ => Ok(self.heights[2]),
        }
    }

    /// Discards all observations and re-initializes the markers.
    pub fn reset(&mut self) {
        self.heights = [0.0; 5];
        self.positions = [0.0, 1.0, 2.0, 3.0, 4.0];
        self.desired = Self::initial_desired(self.q);
        self.count = 0;
    }

    /// Finds the cell `k` such that `heights[k] <= value < heights[k + 1]`,
    /// extending the extreme markers when the value falls outside them.
    fn locate_cell(&mut self, value: f64) -> usize {
        if value < self.heights[0] {
            self.heights[0] = value;
            return 0;
        }
        if value >= self.heights[4] {
            self.heights[4] = value;
            return 3;
        }

        let mut cell = 0;
        for i in 0..4 {
            if self.heights[i] <= value {
                cell = i;
            }
        }
        cell
    }

    fn adjust_marker(&mut self, i: usize) {
        let offset = self.desired[i] - self.positions[i];
        let room_right = self.positions[i + 1] - self.positions[i];
        let room_left = self.positions[i - 1] - self.positions[i];

        if (offset >= 1.0 && room_right > 1.0) || (offset <= -1.0 && room_left < -1.0) {
            let direction = offset.signum();

            let candidate = self.parabolic(i, direction);
            if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                self.heights[i] = candidate;
            } else {
                self.heights[i] = self.linear(i, direction);
            }

            self.positions[i] += direction;
        }
    }

    /// Piecewise-parabolic prediction of the marker height after moving it
    /// by `direction`.
    fn parabolic(&self, i: usize, direction: f64) -> f64 {
        let h = &self.heights;
        let n = &self.positions;

        h[i] + direction / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + direction) * (h[i + 1] - h[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - direction) * (h[i] - h[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, direction: f64) -> f64 {
        let h = &self.heights;
        let n = &self.positions;
        let j = if direction > 0.0 { i + 1 } else { i - 1 };

        h[i] + direction * (h[j] - h[i]) / (n[j] - n[i])
    }
}
