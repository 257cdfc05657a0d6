//! # logscope
//!
//! Streaming log anomaly detection and root-cause diagnosis.
//!
//! Raw log rows flow through a fixed chain of stages:
//!
//! - **Normalization**: validate and coerce rows into [`LogRecord`]s
//! - **Windowing**: aggregate records into epoch-aligned [`MetricWindow`]s
//! - **Scoring**: compare each window against an adaptive [`Baseline`]
//! - **Correlation**: group nearby [`AnomalyEvent`]s into [`IncidentCluster`]s
//! - **Diagnosis**: match clusters against a [`RuleTable`] to explain them
//!
//! Clusters no rule explains are still reported, as
//! [`UndiagnosedClusterError`] outcomes.
//!
//! ## Quick Start
//!
//! ```rust
//! use logscope::{analyze, EngineConfig, RawRow};
//! use serde_json::json;
//!
//! let rows: Vec<RawRow> = serde_json::from_value(json!([
//!     {"timestamp": "2024-03-01T14:00:00Z", "log_level": "INFO", "message": "ok", "cpu_usage": 30},
//!     {"timestamp": "2024-03-01T14:06:00Z", "log_level": "INFO", "message": "ok", "cpu_usage": 31},
//! ]))
//! .expect("valid rows");
//!
//! let report = analyze(EngineConfig::default(), rows).expect("valid config");
//! assert_eq!(report.stats.accepted, 2);
//! assert!(report.anomalies.is_empty());
//! ```

pub mod baseline;
pub mod config;
pub mod correlator;
pub mod diagnosis;
pub mod error;
pub mod formatter;
pub mod normalizer;
pub mod pipeline;
pub mod quantile;
pub mod rules;
pub mod scorer;
pub mod stats;
pub mod types;
pub mod windower;

// Re-export core types for convenience
pub use types::{
    AnomalyEvent, AnomalyType, ClosureReason, DiagnosisOutcome, DiagnosisResult, IncidentCluster,
    LogLevel, LogRecord, MetricKey, MetricWindow, Priority, Severity, TimeRange, TimeSeriesPoint,
    TimelineEntry,
};

pub use error::{ConfigError, Error, IngestionError, RejectReason, Result, UndiagnosedClusterError};

pub use config::{
    BaselineUpdateMode, CorrelatorConfig, EngineConfig, QueueConfig, ScorerConfig, WindowerConfig,
};

// Re-export stage types
pub use baseline::Baseline;
pub use correlator::Correlator;
pub use diagnosis::DiagnosisEngine;
pub use normalizer::{normalize, NormalizeWarning, Normalized, RawRow, CSV_COLUMNS};
pub use quantile::P2Quantile;
pub use rules::{DiagnosisRule, RuleTable};
pub use scorer::Scorer;
pub use windower::Windower;

// Re-export pipeline entry points
pub use pipeline::{
    analyze, spawn_pipeline, spawn_pipeline_with_rules, Pipeline, PipelineHandle, PipelineInput,
    PipelineReport, StageOutput,
};
pub use stats::{DashboardStats, HealthSummary, IngestStats};

// Re-export formatter functions
pub use formatter::{
    format_as_json, format_as_json_compact, format_diagnosis, format_outcome, format_report,
    format_summary, format_undiagnosed,
};
