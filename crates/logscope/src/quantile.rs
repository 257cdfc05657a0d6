//! Streaming quantile estimation with the P² algorithm.
//!
//! Jain and Chlamtac's P² keeps five markers whose heights approximate the
//! minimum, `p/2`, `p`, `(1+p)/2` quantiles and the maximum, adjusting them with
//! piecewise-parabolic interpolation as samples arrive. Memory is constant.

/// Online estimator for a single quantile.
#[derive(Debug, Clone, PartialEq)]
pub struct P2Quantile {
    p: f64,
    count: u64,
    /// Marker heights.
    heights: [f64; 5],
    /// Actual marker positions (1-based).
    positions: [f64; 5],
    /// Desired marker positions.
    desired: [f64; 5],
    /// Desired position increments per sample.
    increments: [f64; 5],
}

impl P2Quantile {
    /// Creates an estimator for quantile `p`, clamped to `[0, 1]`.
    #[must_use]
    pub fn new(p: f64) -> Self {
        let p = if p.is_nan() { 0.5 } else { p.clamp(0.0, 1.0) };
        Self {
            p,
            count: 0,
            heights: [0.0; 5],
            positions: [1.0, 2.0, 3.0, 4.0, 5.0],
            desired: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
        }
    }

    /// Estimator for the 95th percentile.
    #[must_use]
    pub fn p95() -> Self {
        Self::new(0.95)
    }

    /// The quantile being estimated.
    #[must_use]
    pub const fn quantile(&self) -> f64 {
        self.p
    }

    /// Number of samples observed.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Folds in one sample. Non-finite samples are ignored.
    pub fn observe(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }

        if self.count < 5 {
            #[allow(clippy::cast_possible_truncation)]
            let idx = self.count as usize;
            self.heights[idx] = x;
            self.count += 1;
            if self.count == 5 {
                self.heights.sort_by(f64::total_cmp);
            }
            return;
        }
        self.count += 1;

        let k = if x < self.heights[0] {
            self.heights[0] = x;
            0
        } else if x >= self.heights[4] {
            self.heights[4] = x;
            3
        } else {
            (0..4)
                .find(|&i| x >= self.heights[i] && x < self.heights[i + 1])
                .unwrap_or(3)
        };

        for position in &mut self.positions[k + 1..] {
            *position += 1.0;
        }
        for (desired, inc) in self.desired.iter_mut().zip(self.increments) {
            *desired += inc;
        }

        for i in 1..4 {
            let d = self.desired[i] - self.positions[i];
            let room_up = self.positions[i + 1] - self.positions[i] > 1.0;
            let room_down = self.positions[i - 1] - self.positions[i] < -1.0;
            if (d >= 1.0 && room_up) || (d <= -1.0 && room_down) {
                let step = d.signum();
                let candidate = self.parabolic(i, step);
                self.heights[i] = if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                    candidate
                } else {
                    self.linear(i, step)
                };
                self.positions[i] += step;
            }
        }
    }

    /// Current estimate, or `None` before any sample.
    ///
    /// With fewer than five samples the exact quantile of the buffered samples is
    /// returned (linear interpolation between closest ranks).
    #[must_use]
    pub fn estimate(&self) -> Option<f64> {
        match self.count {
            0 => None,
            n if n < 5 => {
                #[allow(clippy::cast_possible_truncation)]
                let mut buf = self.heights[..n as usize].to_vec();
                buf.sort_by(f64::total_cmp);
                #[allow(clippy::cast_precision_loss)]
                let rank = self.p * (buf.len() - 1) as f64;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let lo = rank.floor() as usize;
                let hi = (lo + 1).min(buf.len() - 1);
                #[allow(clippy::cast_precision_loss)]
                let frac = rank - lo as f64;
                Some(buf[lo] + (buf[hi] - buf[lo]) * frac)
            }
            _ => Some(self.heights[2]),
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (q, n) = (&self.heights, &self.positions);
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let (q, n) = (&self.heights, &self.positions);
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        q[i] + d * (q[j] - q[i]) / (n[j] - n[i])
    }
}

impl Default for P2Quantile {
    fn default() -> Self {
        Self::p95()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_has_no_estimate() {
        assert_eq!(P2Quantile::p95().estimate(), None);
    }

    #[test]
    fn test_single_sample() {
        let mut q = P2Quantile::p95();
        q.observe(42.0);
        assert_eq!(q.estimate(), Some(42.0));
    }

    #[test]
    fn test_small_sample_is_exact() {
        let mut q = P2Quantile::new(0.5);
        for x in [3.0, 1.0, 2.0] {
            q.observe(x);
        }
        assert_eq!(q.estimate(), Some(2.0));
    }

    #[test]
    fn test_ignores_non_finite() {
        let mut q = P2Quantile::p95();
        q.observe(f64::NAN);
        q.observe(f64::INFINITY);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_uniform_sequence_accuracy() {
        let mut q = P2Quantile::p95();
        for i in 1..=1000 {
            q.observe(f64::from(i));
        }
        let estimate = q.estimate().expect("estimate after samples");
        assert!((estimate - 950.0).abs() < 25.0, "p95 estimate {estimate}");
    }

    #[test]
    fn test_shuffled_sequence_accuracy() {
        let mut q = P2Quantile::p95();
        // Deterministic permutation of 0..1000 (7 is coprime with 1000).
        for i in 0..1000_u32 {
            q.observe(f64::from((i * 7) % 1000));
        }
        let estimate = q.estimate().expect("estimate after samples");
        assert!((estimate - 950.0).abs() < 50.0, "p95 estimate {estimate}");
    }

    #[test]
    fn test_constant_sequence() {
        let mut q = P2Quantile::p95();
        for _ in 0..100 {
            q.observe(7.5);
        }
        assert_eq!(q.estimate(), Some(7.5));
    }

    proptest! {
        #[test]
        fn prop_estimate_within_observed_range(samples in prop::collection::vec(0.0f64..10_000.0, 1..300)) {
            let mut q = P2Quantile::p95();
            for &x in &samples {
                q.observe(x);
            }
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let estimate = q.estimate().expect("estimate after samples");
            prop_assert!(estimate >= min && estimate <= max);
        }
    }
}
