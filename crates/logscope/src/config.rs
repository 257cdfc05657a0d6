//! Engine configuration.
//!
//! Every stage reads its settings from a section of [`EngineConfig`]. All
//! sections have sensible defaults, `with_*` builders, and are validated up
//! front by [`EngineConfig::validate`] so that a bad setting aborts pipeline
//! construction instead of surfacing mid-stream.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Longest window or correlation span accepted, in seconds (100 years).
pub const MAX_SPAN_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Settings for the metric windower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowerConfig {
    /// Window size in seconds.
    pub window_size_seconds: u64,
    /// Longest run of empty heartbeat windows emitted for one gap.
    pub max_heartbeat_windows: usize,
}

impl Default for WindowerConfig {
    fn default() -> Self {
        Self {
            window_size_seconds: 15 * 60,
            max_heartbeat_windows: 2880,
        }
    }
}

impl WindowerConfig {
    /// Window size as a duration.
    #[must_use]
    pub fn window_size(&self) -> Duration {
        Duration::seconds(self.window_size_seconds as i64)
    }

    /// Sets the window size in seconds.
    #[must_use]
    pub const fn with_window_size_seconds(mut self, seconds: u64) -> Self {
        self.window_size_seconds = seconds;
        self
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.window_size_seconds == 0 || self.window_size_seconds > MAX_SPAN_SECONDS {
            return Err(ConfigError::InvalidWindowSize {
                seconds: self.window_size_seconds,
            });
        }
        if self.max_heartbeat_windows == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_heartbeat_windows",
            });
        }
        Ok(())
    }
}

/// When an anomalous window may feed its metric's baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineUpdateMode {
    /// Every scored window updates the baseline, anomalous or not.
    #[default]
    Always,
    /// Windows that produced an event are kept out of the baseline, for at
    /// most `max_paused_windows` consecutive windows.
    PauseOnAnomaly,
}

/// Settings for the anomaly scorer and its baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Exponential decay factor for baseline updates, in (0, 1].
    pub baseline_alpha: f64,
    /// Windows a fresh baseline must absorb before z-scores are trusted.
    pub min_baseline_windows: u64,
    /// Absolute floor applied to the baseline stddev when computing z.
    pub stddev_floor: f64,
    /// Floor as a fraction of the baseline mean's magnitude.
    pub relative_stddev_floor: f64,
    /// Floor for counting metrics, in records per window.
    pub counter_stddev_floor: f64,
    /// Score at or above which a window is a warning.
    pub warning_score: f64,
    /// Score at or above which a window is critical.
    pub critical_score: f64,
    /// Absolute response-time ceiling for slow-query detection (ms).
    pub slow_query_ceiling_ms: f64,
    /// Baseline update policy.
    pub baseline_update_mode: BaselineUpdateMode,
    /// Longest run of skipped updates under `PauseOnAnomaly`.
    pub max_paused_windows: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            baseline_alpha: 0.2,
            min_baseline_windows: 4,
            stddev_floor: 1e-3,
            relative_stddev_floor: 0.1,
            counter_stddev_floor: 1.0,
            warning_score: 60.0,
            critical_score: 85.0,
            slow_query_ceiling_ms: 5000.0,
            baseline_update_mode: BaselineUpdateMode::Always,
            max_paused_windows: 4,
        }
    }
}

impl ScorerConfig {
    /// Sets the baseline smoothing factor.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: f64) -> Self {
        self.baseline_alpha = alpha;
        self
    }

    /// Sets the baseline update policy.
    #[must_use]
    pub const fn with_update_mode(mut self, mode: BaselineUpdateMode) -> Self {
        self.baseline_update_mode = mode;
        self
    }

    /// Sets the warm-up length.
    #[must_use]
    pub const fn with_min_baseline_windows(mut self, windows: u64) -> Self {
        self.min_baseline_windows = windows;
        self
    }

    /// Sets the relative and counter stddev floors.
    #[must_use]
    pub const fn with_stddev_floors(mut self, relative: f64, counter: f64) -> Self {
        self.relative_stddev_floor = relative;
        self.counter_stddev_floor = counter;
        self
    }

    /// Sets the slow-query ceiling.
    #[must_use]
    pub const fn with_slow_query_ceiling(mut self, ceiling_ms: f64) -> Self {
        self.slow_query_ceiling_ms = ceiling_ms;
        self
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.baseline_alpha > 0.0 && self.baseline_alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha {
                alpha: self.baseline_alpha,
            });
        }
        if !(self.stddev_floor.is_finite() && self.stddev_floor > 0.0) {
            return Err(ConfigError::InvalidEpsilon {
                epsilon: self.stddev_floor,
            });
        }
        for (field, value) in [
            ("relative_stddev_floor", self.relative_stddev_floor),
            ("counter_stddev_floor", self.counter_stddev_floor),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidStddevFloor { field, value });
            }
        }
        let ordered = self.warning_score > 50.0
            && self.warning_score < self.critical_score
            && self.critical_score <= 100.0;
        if !ordered {
            return Err(ConfigError::InvalidThresholds {
                warning: self.warning_score,
                critical: self.critical_score,
            });
        }
        if !(self.slow_query_ceiling_ms.is_finite() && self.slow_query_ceiling_ms > 0.0) {
            return Err(ConfigError::InvalidSlowQueryCeiling {
                ceiling_ms: self.slow_query_ceiling_ms,
            });
        }
        Ok(())
    }
}

/// Settings for the event correlator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Maximum gap between a cluster's latest event and a joining event (seconds).
    pub correlation_window_seconds: u64,
    /// Cluster size at which a cluster is closed.
    pub max_cluster_events: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            correlation_window_seconds: 10 * 60,
            max_cluster_events: 50,
        }
    }
}

impl CorrelatorConfig {
    /// Correlation window as a duration.
    #[must_use]
    pub fn correlation_window(&self) -> Duration {
        Duration::seconds(self.correlation_window_seconds as i64)
    }

    /// Sets the correlation window in seconds.
    #[must_use]
    pub const fn with_correlation_window_seconds(mut self, seconds: u64) -> Self {
        self.correlation_window_seconds = seconds;
        self
    }

    /// Sets the cluster size cap.
    #[must_use]
    pub const fn with_max_cluster_events(mut self, max: usize) -> Self {
        self.max_cluster_events = max;
        self
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.correlation_window_seconds == 0 || self.correlation_window_seconds > MAX_SPAN_SECONDS {
            return Err(ConfigError::InvalidCorrelationWindow {
                seconds: self.correlation_window_seconds,
            });
        }
        if self.max_cluster_events == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_cluster_events",
            });
        }
        Ok(())
    }
}

/// Queue bounds for the async pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the raw row input queue.
    pub input_capacity: usize,
    /// Capacity of the anomaly output queue.
    pub anomaly_capacity: usize,
    /// Capacity of the queue between correlator and diagnosis.
    pub cluster_capacity: usize,
    /// Closed clusters held by the detection task while the cluster queue is full.
    pub max_pending_clusters: usize,
    /// Capacity of the diagnosis output queue.
    pub outcome_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            input_capacity: 1024,
            anomaly_capacity: 256,
            cluster_capacity: 16,
            max_pending_clusters: 64,
            outcome_capacity: 64,
        }
    }
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> std::result::Result<(), ConfigError> {
        let limits = [
            ("input_capacity", self.input_capacity),
            ("anomaly_capacity", self.anomaly_capacity),
            ("cluster_capacity", self.cluster_capacity),
            ("max_pending_clusters", self.max_pending_clusters),
            ("outcome_capacity", self.outcome_capacity),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Windower settings.
    pub windower: WindowerConfig,
    /// Scorer settings.
    pub scorer: ScorerConfig,
    /// Correlator settings.
    pub correlator: CorrelatorConfig,
    /// Async pipeline queue bounds.
    pub queues: QueueConfig,
    /// Ingestion error ratio above which detection is reported as degraded.
    pub degraded_error_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            windower: WindowerConfig::default(),
            scorer: ScorerConfig::default(),
            correlator: CorrelatorConfig::default(),
            queues: QueueConfig::default(),
            degraded_error_ratio: 0.05,
        }
    }
}

impl EngineConfig {
    /// Sets the windower section.
    #[must_use]
    pub fn with_windower(mut self, windower: WindowerConfig) -> Self {
        self.windower = windower;
        self
    }

    /// Sets the scorer section.
    #[must_use]
    pub fn with_scorer(mut self, scorer: ScorerConfig) -> Self {
        self.scorer = scorer;
        self
    }

    /// Sets the correlator section.
    #[must_use]
    pub fn with_correlator(mut self, correlator: CorrelatorConfig) -> Self {
        self.correlator = correlator;
        self
    }

    /// Sets the queue bounds.
    #[must_use]
    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.windower.validate()?;
        self.scorer.validate()?;
        self.correlator.validate()?;
        self.queues.validate()?;
        if !(0.0..=1.0).contains(&self.degraded_error_ratio) {
            return Err(ConfigError::InvalidDegradedRatio {
                ratio: self.degraded_error_ratio,
            });
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a setting is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use test_case::test_case;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.windower.window_size(), Duration::minutes(15));
        assert_eq!(config.correlator.correlation_window(), Duration::minutes(10));
        assert_eq!(config.correlator.max_cluster_events, 50);
        assert!((config.scorer.baseline_alpha - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.scorer.baseline_update_mode, BaselineUpdateMode::Always);
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = EngineConfig::default()
            .with_windower(WindowerConfig::default().with_window_size_seconds(0));
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidWindowSize { seconds: 0 })
        );
    }

    #[test_case(MAX_SPAN_SECONDS + 1 ; "just over the cap")]
    #[test_case(9_000_000_000_000 ; "far beyond the date range")]
    fn test_oversized_spans_rejected(seconds: u64) {
        let windower = EngineConfig::default()
            .with_windower(WindowerConfig::default().with_window_size_seconds(seconds));
        assert_eq!(windower.validate(), Err(ConfigError::InvalidWindowSize { seconds }));

        let correlator = EngineConfig::default()
            .with_correlator(CorrelatorConfig::default().with_correlation_window_seconds(seconds));
        assert_eq!(
            correlator.validate(),
            Err(ConfigError::InvalidCorrelationWindow { seconds })
        );
    }

    #[test]
    fn test_span_cap_is_allowed() {
        let config = EngineConfig::default()
            .with_windower(WindowerConfig::default().with_window_size_seconds(MAX_SPAN_SECONDS))
            .with_correlator(CorrelatorConfig::default().with_correlation_window_seconds(MAX_SPAN_SECONDS));
        assert!(config.validate().is_ok());
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-0.5 ; "negative")]
    #[test_case(1.5 ; "above one")]
    #[test_case(f64::NAN ; "nan")]
    fn test_invalid_alpha_rejected(alpha: f64) {
        let config = EngineConfig::default().with_scorer(ScorerConfig::default().with_alpha(alpha));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAlpha { .. })));
    }

    #[test]
    fn test_alpha_of_one_is_allowed() {
        let config = EngineConfig::default().with_scorer(ScorerConfig::default().with_alpha(1.0));
        assert!(config.validate().is_ok());
    }

    #[test_case(60.0, 60.0 ; "equal thresholds")]
    #[test_case(90.0, 85.0 ; "inverted thresholds")]
    #[test_case(40.0, 85.0 ; "warning below midpoint")]
    #[test_case(60.0, 120.0 ; "critical above 100")]
    fn test_invalid_thresholds_rejected(warning: f64, critical: f64) {
        let scorer = ScorerConfig {
            warning_score: warning,
            critical_score: critical,
            ..ScorerConfig::default()
        };
        let config = EngineConfig::default().with_scorer(scorer);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThresholds { .. })));
    }

    #[test_case(-0.1, 1.0, "relative_stddev_floor" ; "negative relative floor")]
    #[test_case(f64::NAN, 1.0, "relative_stddev_floor" ; "nan relative floor")]
    #[test_case(0.1, f64::INFINITY, "counter_stddev_floor" ; "infinite counter floor")]
    fn test_invalid_stddev_floors_rejected(relative: f64, counter: f64, expected: &str) {
        let config = EngineConfig::default()
            .with_scorer(ScorerConfig::default().with_stddev_floors(relative, counter));
        match config.validate() {
            Err(ConfigError::InvalidStddevFloor { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected InvalidStddevFloor, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_scale_floors_are_allowed() {
        let config = EngineConfig::default().with_scorer(ScorerConfig::default().with_stddev_floors(0.0, 0.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_correlation_window_rejected() {
        let config = EngineConfig::default()
            .with_correlator(CorrelatorConfig::default().with_correlation_window_seconds(0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCorrelationWindow { .. })
        ));
    }

    #[test]
    fn test_zero_cluster_cap_rejected() {
        let config = EngineConfig::default()
            .with_correlator(CorrelatorConfig::default().with_max_cluster_events(0));
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit { field: "max_cluster_events" })
        );
    }

    #[test]
    fn test_zero_queue_rejected() {
        let queues = QueueConfig {
            cluster_capacity: 0,
            ..QueueConfig::default()
        };
        let config = EngineConfig::default().with_queues(queues);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit { field: "cluster_capacity" })
        );
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EngineConfig::from_json(
            r#"{"windower": {"window_size_seconds": 300}, "scorer": {"baseline_update_mode": "pause_on_anomaly"}}"#,
        )
        .expect("valid config");
        assert_eq!(config.windower.window_size_seconds, 300);
        assert_eq!(config.windower.max_heartbeat_windows, 2880);
        assert_eq!(config.scorer.baseline_update_mode, BaselineUpdateMode::PauseOnAnomaly);
        assert_eq!(config.correlator, CorrelatorConfig::default());
    }

    #[test]
    fn test_from_json_validates() {
        let result = EngineConfig::from_json(r#"{"scorer": {"baseline_alpha": 0.0}}"#);
        assert!(matches!(result, Err(Error::Config(ConfigError::InvalidAlpha { .. }))));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        let result = EngineConfig::from_json("{not json");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
