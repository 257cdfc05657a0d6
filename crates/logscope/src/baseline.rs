//! Exponentially weighted baselines.

use serde::{Deserialize, Serialize};

/// Trailing expectation for one metric: an EWMA of window means together with
/// an exponentially weighted variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    mean: f64,
    variance: f64,
    alpha: f64,
    samples: u64,
    /// Set when the baseline was seeded from a known profile.
    seeded: bool,
}

impl Baseline {
    /// A fresh, untrained baseline.
    #[must_use]
    pub const fn new(alpha: f64) -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            alpha,
            samples: 0,
            seeded: false,
        }
    }

    /// A baseline seeded from a known profile. Ready immediately.
    #[must_use]
    pub fn with_profile(mean: f64, stddev: f64, alpha: f64) -> Self {
        Self {
            mean,
            variance: stddev * stddev,
            alpha,
            samples: 0,
            seeded: true,
        }
    }

    /// Folds one window mean in.
    pub fn update(&mut self, value: f64) {
        if self.samples == 0 && !self.seeded {
            self.mean = value;
            self.variance = 0.0;
        } else {
            let diff = value - self.mean;
            self.mean = self.alpha * value + (1.0 - self.alpha) * self.mean;
            self.variance = (1.0 - self.alpha) * (self.variance + self.alpha * diff * diff);
        }
        self.samples += 1;
    }

    /// True once the baseline has absorbed `min_windows` windows or was seeded.
    #[must_use]
    pub const fn is_ready(&self, min_windows: u64) -> bool {
        self.seeded || self.samples >= min_windows
    }

    /// Expected value.
    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Expected spread.
    #[must_use]
    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Windows absorbed so far.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Smoothing factor.
    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.alpha
    }
}
