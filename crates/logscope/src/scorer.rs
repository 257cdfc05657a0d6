//! Window scoring against per-metric baselines.
//!
//! [`score`] is a pure function of a sealed window, a baseline and the scorer
//! settings. [`Scorer`] wraps it with one [`Baseline`] per metric and applies
//! the configured update policy after each window.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::baseline::Baseline;
use crate::config::{BaselineUpdateMode, ScorerConfig};
use crate::error::ConfigError;
use crate::types::{AnomalyEvent, AnomalyType, MetricKey, MetricWindow, Severity};

/// Points added to the score per standard deviation.
const POINTS_PER_SIGMA: f64 = 25.0;
/// Score of a window exactly at baseline.
const NEUTRAL_SCORE: f64 = 50.0;

/// Maps a z-score onto `[0, 100]`.
#[must_use]
pub fn z_to_score(z: f64) -> f64 {
    POINTS_PER_SIGMA.mul_add(z, NEUTRAL_SCORE).clamp(0.0, 100.0)
}

/// Severity of a score under the configured thresholds.
#[must_use]
pub fn classify(score: f64, config: &ScorerConfig) -> Severity {
    if score >= config.critical_score {
        Severity::Critical
    } else if score >= config.warning_score {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

/// Standard deviation used as the z denominator for `key`.
///
/// The baseline stddev is floored three ways: by the absolute
/// `stddev_floor`, by `relative_stddev_floor` times the baseline mean's
/// magnitude, and for counting metrics by `counter_stddev_floor`. A quiet
/// baseline therefore cannot turn a one-record change into a huge z.
#[must_use]
pub fn effective_stddev(key: MetricKey, baseline: &Baseline, config: &ScorerConfig) -> f64 {
    let relative = config.relative_stddev_floor * baseline.mean().abs();
    let counter = if key.is_counter() {
        config.counter_stddev_floor
    } else {
        0.0
    };
    baseline
        .stddev()
        .max(config.stddev_floor)
        .max(relative)
        .max(counter)
}

/// Scores one window against a baseline.
///
/// Returns `None` for empty heartbeat windows and for windows that score
/// below the warning threshold. Z-based events require a ready baseline; the
/// slow-query ceiling applies regardless.
#[must_use]
pub fn score(window: &MetricWindow, baseline: &Baseline, config: &ScorerConfig) -> Option<AnomalyEvent> {
    if window.is_empty() {
        return None;
    }

    let key = window.metric_key;
    let ready = baseline.is_ready(config.min_baseline_windows);
    let sigma = effective_stddev(key, baseline, config);
    let z = (window.mean - baseline.mean()) / sigma;
    if !z.is_finite() {
        return None;
    }
    let z_score = z_to_score(z);

    if key == MetricKey::ResponseTime && window.max > config.slow_query_ceiling_ms {
        let score = if ready {
            z_score.max(config.critical_score)
        } else {
            config.critical_score
        };
        return Some(build_event(
            window,
            AnomalyType::SlowQuery,
            Severity::Critical,
            score,
            window.max,
            config.slow_query_ceiling_ms,
            if ready { z } else { 0.0 },
            format!(
                "Slowest response {:.0}ms exceeded the {:.0}ms ceiling (window mean {:.0}ms)",
                window.max, config.slow_query_ceiling_ms, window.mean
            ),
        ));
    }

    if !ready {
        return None;
    }

    let severity = classify(z_score, config);
    if severity == Severity::Normal {
        return None;
    }

    let threshold = ((config.warning_score - NEUTRAL_SCORE) / POINTS_PER_SIGMA).mul_add(sigma, baseline.mean());
    Some(build_event(
        window,
        key.anomaly_type(),
        severity,
        z_score,
        window.mean,
        threshold,
        z,
        format!(
            "{key} at {:.2} is {z:.1} standard deviations above baseline {:.2}",
            window.mean,
            baseline.mean()
        ),
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    window: &MetricWindow,
    anomaly_type: AnomalyType,
    severity: Severity,
    score: f64,
    metric_value: f64,
    threshold: f64,
    z_score: f64,
    description: String,
) -> AnomalyEvent {
    AnomalyEvent {
        id: AnomalyEvent::derive_id(window.metric_key, anomaly_type, window.window_end),
        timestamp: window.window_end,
        metric_key: window.metric_key,
        anomaly_type,
        severity,
        score,
        metric_value,
        threshold,
        description,
        z_score,
        services: window.services.iter().cloned().collect(),
    }
}

/// Stateful scorer owning one baseline per metric.
#[derive(Debug)]
pub struct Scorer {
    config: ScorerConfig,
    baselines: HashMap<MetricKey, Baseline>,
    paused: HashMap<MetricKey, u64>,
}

impl Scorer {
    /// Creates a scorer with untrained baselines.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid alpha, epsilon or thresholds.
    pub fn new(config: ScorerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            baselines: HashMap::new(),
            paused: HashMap::new(),
        })
    }

    /// Seeds a metric's baseline with a known profile.
    #[must_use]
    pub fn with_profile(mut self, key: MetricKey, mean: f64, stddev: f64) -> Self {
        self.baselines
            .insert(key, Baseline::with_profile(mean, stddev, self.config.baseline_alpha));
        self
    }

    /// Current baseline for a metric.
    #[must_use]
    pub fn baseline(&self, key: MetricKey) -> Option<&Baseline> {
        self.baselines.get(&key)
    }

    /// Scorer settings.
    #[must_use]
    pub const fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Scores a sealed window and then updates that metric's baseline.
    pub fn observe(&mut self, window: &MetricWindow) -> Option<AnomalyEvent> {
        if window.is_empty() {
            return None;
        }

        let key = window.metric_key;
        let alpha = self.config.baseline_alpha;
        let baseline = self.baselines.entry(key).or_insert_with(|| Baseline::new(alpha));
        let event = score(window, baseline, &self.config);

        let paused = self.paused.entry(key).or_insert(0);
        let hold = self.config.baseline_update_mode == BaselineUpdateMode::PauseOnAnomaly
            && event.is_some()
            && baseline.is_ready(self.config.min_baseline_windows)
            && *paused < self.config.max_paused_windows;
        if hold {
            *paused += 1;
            debug!(metric = %key, paused = *paused, "Baseline update paused");
        } else {
            *paused = 0;
            baseline.update(window.mean);
        }

        if let Some(event) = &event {
            info!(
                metric = %key,
                anomaly_type = %event.anomaly_type,
                severity = %event.severity,
                score = event.score,
                "Anomaly detected"
            );
        }
        event
    }

    /// Scores a batch of windows in order.
    pub fn observe_all<'a, I>(&mut self, windows: I) -> Vec<AnomalyEvent>
    where
        I: IntoIterator<Item = &'a MetricWindow>,
    {
        windows.into_iter().filter_map(|w| self.observe(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn start(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
            + Duration::minutes(15 * index)
    }

    fn window(key: MetricKey, index: i64, mean: f64) -> MetricWindow {
        MetricWindow::empty(key, start(index), start(index + 1)).with_stats(10, mean, 1.0)
    }

    fn profiled(key: MetricKey, mean: f64, stddev: f64) -> Scorer {
        Scorer::new(ScorerConfig::default())
            .expect("default config is valid")
            .with_profile(key, mean, stddev)
    }

    mod pure_score_tests {
        use super::*;

        #[test]
        fn test_score_mapping() {
            assert!((z_to_score(0.0) - 50.0).abs() < f64::EPSILON);
            assert!((z_to_score(1.0) - 75.0).abs() < f64::EPSILON);
            assert!((z_to_score(10.0) - 100.0).abs() < f64::EPSILON);
            assert!(z_to_score(-10.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_classify_thresholds() {
            let config = ScorerConfig::default();
            assert_eq!(classify(59.9, &config), Severity::Normal);
            assert_eq!(classify(60.0, &config), Severity::Warning);
            assert_eq!(classify(85.0, &config), Severity::Critical);
        }

        #[test]
        fn test_warning_event_fields() {
            let config = ScorerConfig::default();
            let baseline = Baseline::with_profile(50.0, 10.0, 0.2);
            let event = score(&window(MetricKey::CpuUsage, 0, 60.0), &baseline, &config)
                .expect("one sigma scores 75");

            assert_eq!(event.anomaly_type, AnomalyType::CpuSpike);
            assert_eq!(event.severity, Severity::Warning);
            assert!((event.score - 75.0).abs() < 1e-9);
            assert!((event.metric_value - 60.0).abs() < 1e-9);
            // 60 points is 0.4 sigma above baseline.
            assert!((event.threshold - 54.0).abs() < 1e-9);
            assert_eq!(event.timestamp, start(1));
        }

        #[test]
        fn test_stddev_floors_scale_with_metric() {
            let config = ScorerConfig::default();
            let quiet = Baseline::with_profile(0.0, 0.0, 0.2);
            assert!((effective_stddev(MetricKey::ErrorCount, &quiet, &config) - 1.0).abs() < f64::EPSILON);
            assert!((effective_stddev(MetricKey::CpuUsage, &quiet, &config) - 1e-3).abs() < f64::EPSILON);

            let busy = Baseline::with_profile(400.0, 2.0, 0.2);
            assert!((effective_stddev(MetricKey::ResponseTime, &busy, &config) - 40.0).abs() < 1e-9);

            let noisy = Baseline::with_profile(400.0, 90.0, 0.2);
            assert!((effective_stddev(MetricKey::ResponseTime, &noisy, &config) - 90.0).abs() < 1e-9);
        }

        #[test]
        fn test_below_baseline_is_silent() {
            let baseline = Baseline::with_profile(50.0, 10.0, 0.2);
            let result = score(&window(MetricKey::CpuUsage, 0, 20.0), &baseline, &ScorerConfig::default());
            assert!(result.is_none());
        }

        #[test]
        fn test_empty_window_is_not_scored() {
            let baseline = Baseline::with_profile(0.0, 1.0, 0.2);
            let heartbeat = MetricWindow::empty(MetricKey::CpuUsage, start(0), start(1)).with_stats(0, 99.0, 0.0);
            assert!(score(&heartbeat, &baseline, &ScorerConfig::default()).is_none());
        }

        #[test]
        fn test_slow_query_override_during_warm_up() {
            let baseline = Baseline::new(0.2);
            let w = window(MetricKey::ResponseTime, 0, 800.0).with_extremes(12_000.0, 900.0);
            let event = score(&w, &baseline, &ScorerConfig::default()).expect("ceiling exceeded");

            assert_eq!(event.anomaly_type, AnomalyType::SlowQuery);
            assert_eq!(event.severity, Severity::Critical);
            assert!(event.score >= 85.0);
            assert!((event.metric_value - 12_000.0).abs() < f64::EPSILON);
            assert!((event.threshold - 5000.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_response_time_below_ceiling_uses_z() {
            let baseline = Baseline::with_profile(200.0, 50.0, 0.2);
            let w = window(MetricKey::ResponseTime, 0, 400.0).with_extremes(900.0, 800.0);
            let event = score(&w, &baseline, &ScorerConfig::default()).expect("four sigma");
            assert_eq!(event.anomaly_type, AnomalyType::ResponseTime);
        }
    }

    mod stateful_tests {
        use super::*;

        #[test]
        fn test_error_spike_scenario() {
            let mut scorer = profiled(MetricKey::ErrorCount, 10.0, 5.0);

            assert!(scorer.observe(&window(MetricKey::ErrorCount, 0, 10.0)).is_none());
            assert!(scorer.observe(&window(MetricKey::ErrorCount, 1, 10.0)).is_none());
            let event = scorer
                .observe(&window(MetricKey::ErrorCount, 2, 160.0))
                .expect("spike");

            assert_eq!(event.anomaly_type, AnomalyType::ErrorSpike);
            assert_eq!(event.severity, Severity::Critical);
            assert!((event.score - 100.0).abs() < f64::EPSILON);
        }

        #[test]
        fn test_single_error_after_quiet_baseline_is_not_critical() {
            let mut scorer = Scorer::new(ScorerConfig::default()).expect("valid");
            for index in 0..6 {
                let quiet = MetricWindow::empty(MetricKey::ErrorCount, start(index), start(index + 1)).with_stats(5, 0.0, 0.0);
                assert!(scorer.observe(&quiet).is_none());
            }

            let one_error = MetricWindow::empty(MetricKey::ErrorCount, start(6), start(7)).with_stats(5, 1.0, 0.0);
            let event = scorer.observe(&one_error);
            assert!(event.as_ref().is_none_or(|e| e.severity != Severity::Critical), "got {event:?}");
        }

        #[test]
        fn test_warm_up_suppresses_z_events() {
            let mut scorer = Scorer::new(ScorerConfig::default()).expect("valid");
            for (i, mean) in [10.0, 11.0, 9.0].into_iter().enumerate() {
                let index = i64::try_from(i).expect("small");
                assert!(scorer.observe(&window(MetricKey::CpuUsage, index, mean)).is_none());
            }
            assert!(scorer.observe(&window(MetricKey::CpuUsage, 3, 500.0)).is_none());
            assert_eq!(scorer.baseline(MetricKey::CpuUsage).map(Baseline::samples), Some(4));
            assert!(scorer.observe(&window(MetricKey::CpuUsage, 4, 5000.0)).is_some());
        }

        #[test]
        fn test_heartbeats_do_not_feed_baseline() {
            let mut scorer = profiled(MetricKey::CpuUsage, 10.0, 1.0);
            let heartbeat = MetricWindow::empty(MetricKey::CpuUsage, start(0), start(1)).with_stats(0, 10.0, 0.0);
            assert!(scorer.observe(&heartbeat).is_none());
            assert_eq!(scorer.baseline(MetricKey::CpuUsage).map(Baseline::samples), Some(0));
        }

        #[test]
        fn test_always_mode_absorbs_anomalies() {
            let mut scorer = profiled(MetricKey::CpuUsage, 10.0, 1.0);
            assert!(scorer.observe(&window(MetricKey::CpuUsage, 0, 100.0)).is_some());
            let mean = scorer.baseline(MetricKey::CpuUsage).map(Baseline::mean).expect("baseline");
            assert!(mean > 10.0);
        }

        #[test]
        fn test_pause_on_anomaly_is_bounded() {
            let config = ScorerConfig::default().with_update_mode(BaselineUpdateMode::PauseOnAnomaly);
            let max_paused = config.max_paused_windows;
            let mut scorer = Scorer::new(config)
                .expect("valid")
                .with_profile(MetricKey::CpuUsage, 10.0, 1.0);

            for i in 0..max_paused {
                let index = i64::try_from(i).expect("small");
                assert!(scorer.observe(&window(MetricKey::CpuUsage, index, 100.0)).is_some());
                let b = scorer.baseline(MetricKey::CpuUsage).expect("baseline");
                assert!((b.mean() - 10.0).abs() < f64::EPSILON, "paused window {i} moved the baseline");
            }

            let index = i64::try_from(max_paused).expect("small");
            assert!(scorer.observe(&window(MetricKey::CpuUsage, index, 100.0)).is_some());
            let b = scorer.baseline(MetricKey::CpuUsage).expect("baseline");
            assert!(b.mean() > 10.0, "baseline must resume after the pause cap");
        }

        #[test]
        fn test_invalid_alpha_rejected() {
            let err = Scorer::new(ScorerConfig::default().with_alpha(1.5)).expect_err("alpha > 1");
            assert!(matches!(err, ConfigError::InvalidAlpha { .. }));
        }
    }

    proptest! {
        #[test]
        fn prop_score_is_idempotent(mean in 0.0f64..1000.0, base in 0.0f64..1000.0, sd in 0.01f64..100.0) {
            let config = ScorerConfig::default();
            let baseline = Baseline::with_profile(base, sd, 0.2);
            let w = window(MetricKey::MemoryUsage, 0, mean);
            prop_assert_eq!(score(&w, &baseline, &config), score(&w, &baseline, &config));
        }

        #[test]
        fn prop_score_is_monotonic_in_mean(a in 0.0f64..1000.0, delta in 0.001f64..100.0, sd in 0.1f64..100.0) {
            let config = ScorerConfig::default();
            let baseline = Baseline::with_profile(100.0, sd, 0.2);
            let lo = (a - 100.0) / sd;
            let hi = (a + delta - 100.0) / sd;
            prop_assert!(hi > lo);
            prop_assert!(z_to_score(hi) >= z_to_score(lo));

            let low = score(&window(MetricKey::CpuUsage, 0, a), &baseline, &config).map_or(0.0, |e| e.score);
            let high = score(&window(MetricKey::CpuUsage, 0, a + delta), &baseline, &config).map_or(0.0, |e| e.score);
            prop_assert!(high >= low);
        }
    }
}
