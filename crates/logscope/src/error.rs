//! Error types for the logscope engine.
//!
//! Three concerns are kept apart so callers can tell them apart:
//! - [`IngestionError`]: a single bad or late record, recovered locally.
//! - [`ConfigError`]: an invalid configuration, fatal before processing starts.
//! - [`UndiagnosedClusterError`]: an incident with no matching rule, returned as a value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AnomalyType, TimeRange};

/// Why the normalizer refused a raw row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// The row has no timestamp.
    #[error("missing timestamp")]
    MissingTimestamp,

    /// The timestamp is present but is not a valid instant.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The row has no message.
    #[error("missing message")]
    MissingMessage,

    /// A numeric field holds text that is not a number.
    #[error("malformed number in field '{0}'")]
    MalformedNumber(String),
}

impl RejectReason {
    /// Stable counter key for this reason.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingTimestamp => "missing_timestamp",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::MissingMessage => "missing_message",
            Self::MalformedNumber(_) => "malformed_number",
        }
    }
}

/// Errors for individual records. Never fatal: the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    /// The row was rejected by the normalizer.
    #[error("record rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// The record is older than the currently open window.
    #[error("late record at {timestamp} (open window starts at {window_start})")]
    LateRecord {
        /// Timestamp of the dropped record.
        timestamp: DateTime<Utc>,
        /// Start of the window that was open when it arrived.
        window_start: DateTime<Utc>,
    },
}

/// Invalid configuration, surfaced before any processing begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Window size must be a positive number of seconds, at most [`MAX_SPAN_SECONDS`](crate::config::MAX_SPAN_SECONDS).
    #[error("invalid window size: {seconds}s (must be > 0 and at most 100 years)")]
    InvalidWindowSize {
        /// The rejected value.
        seconds: u64,
    },

    /// The baseline smoothing factor must lie in (0, 1].
    #[error("invalid baseline alpha: {alpha} (must be in (0, 1])")]
    InvalidAlpha {
        /// The rejected value.
        alpha: f64,
    },

    /// The stddev floor must be positive and finite.
    #[error("invalid stddev floor: {epsilon} (must be > 0)")]
    InvalidEpsilon {
        /// The rejected value.
        epsilon: f64,
    },

    /// A scale-aware stddev floor must be finite and not negative.
    #[error("invalid {field}: {value} (must be >= 0)")]
    InvalidStddevFloor {
        /// Which floor.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// Score thresholds must satisfy 50 < warning < critical <= 100.
    #[error("invalid score thresholds: warning={warning}, critical={critical}")]
    InvalidThresholds {
        /// Warning threshold.
        warning: f64,
        /// Critical threshold.
        critical: f64,
    },

    /// The slow-query ceiling must be positive.
    #[error("invalid slow query ceiling: {ceiling_ms}ms")]
    InvalidSlowQueryCeiling {
        /// The rejected value.
        ceiling_ms: f64,
    },

    /// The correlation window must be a positive number of seconds, at most [`MAX_SPAN_SECONDS`](crate::config::MAX_SPAN_SECONDS).
    #[error("invalid correlation window: {seconds}s (must be > 0 and at most 100 years)")]
    InvalidCorrelationWindow {
        /// The rejected value.
        seconds: u64,
    },

    /// A count-valued setting was zero.
    #[error("invalid {field}: must be > 0")]
    ZeroLimit {
        /// Name of the offending setting.
        field: &'static str,
    },

    /// The degraded ratio must lie in [0, 1].
    #[error("invalid degraded error ratio: {ratio} (must be in [0, 1])")]
    InvalidDegradedRatio {
        /// The rejected value.
        ratio: f64,
    },

    /// The diagnosis rule table is unusable.
    #[error("invalid rule table: {reason}")]
    InvalidRuleTable {
        /// What is wrong with it.
        reason: String,
    },
}

/// An incident whose anomaly-type combination matched no diagnosis rule.
///
/// Returned instead of a guessed root cause so the caller can render
/// "anomaly detected, cause unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("incident {cluster_id} undiagnosed: no rule matches {anomaly_types:?}")]
pub struct UndiagnosedClusterError {
    /// The cluster that could not be explained.
    pub cluster_id: Uuid,
    /// Distinct anomaly types present in the cluster, sorted.
    pub anomaly_types: Vec<AnomalyType>,
    /// Services touched by the cluster.
    pub affected_services: Vec<String>,
    /// When the incident started and ended.
    pub time_span: TimeRange,
    /// Highest member score.
    pub peak_score: f64,
}

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The async pipeline's input was closed.
    #[error("pipeline closed")]
    PipelineClosed,

    /// A pipeline task panicked or was cancelled.
    #[error("pipeline task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
