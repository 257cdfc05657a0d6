//! Core types shared by every stage of the engine.
//!
//! This module defines the records flowing through the pipeline, from the
//! normalized [`LogRecord`] through [`MetricWindow`] and [`AnomalyEvent`] to
//! [`IncidentCluster`] and the final [`DiagnosisResult`].

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UndiagnosedClusterError;

/// Namespace for the deterministic v5 ids minted by the engine.
pub(crate) const ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_6773_636f_7065_8a1e_4d2b_9c3f_0e71);

/// Log severity levels as they appear in ingested rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug-level log.
    Debug,
    /// Informational log.
    #[default]
    Info,
    /// Warning-level log.
    Warn,
    /// Error-level log.
    Error,
    /// Critical-level log.
    Critical,
}

impl LogLevel {
    /// Returns true for levels counted by the `error_count` metric.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Critical)
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One normalized observation.
///
/// Produced by the normalizer and never mutated afterwards. Numeric fields are
/// `None` when the row carried no observation for that metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the observation was made.
    pub timestamp: DateTime<Utc>,
    /// Log level.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Application error code, if any.
    pub error_code: Option<String>,
    /// Response time in milliseconds.
    pub response_time_ms: Option<f64>,
    /// CPU utilization percentage.
    pub cpu_percent: Option<f64>,
    /// Memory utilization percentage.
    pub memory_percent: Option<f64>,
    /// Request count reported by this record.
    pub request_count: Option<f64>,
    /// Emitting service.
    pub service: Option<String>,
}

impl LogRecord {
    /// Creates a record with no metric observations.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
            error_code: None,
            response_time_ms: None,
            cpu_percent: None,
            memory_percent: None,
            request_count: None,
            service: None,
        }
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Sets the response time.
    #[must_use]
    pub const fn with_response_time(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    /// Sets the CPU utilization.
    #[must_use]
    pub const fn with_cpu(mut self, percent: f64) -> Self {
        self.cpu_percent = Some(percent);
        self
    }

    /// Sets the memory utilization.
    #[must_use]
    pub const fn with_memory(mut self, percent: f64) -> Self {
        self.memory_percent = Some(percent);
        self
    }

    /// Sets the request count.
    #[must_use]
    pub const fn with_requests(mut self, count: f64) -> Self {
        self.request_count = Some(count);
        self
    }

    /// Sets the emitting service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Returns true if this record counts towards `error_count`.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.level.is_error()
    }
}

/// The metrics tracked per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    /// Number of ERROR/CRITICAL records per window.
    ErrorCount,
    /// Response time in milliseconds.
    ResponseTime,
    /// CPU utilization percentage.
    CpuUsage,
    /// Memory utilization percentage.
    MemoryUsage,
    /// Reported request count.
    RequestCount,
}

impl MetricKey {
    /// All tracked metrics, in a fixed order.
    pub const ALL: [Self; 5] = [
        Self::ErrorCount,
        Self::ResponseTime,
        Self::CpuUsage,
        Self::MemoryUsage,
        Self::RequestCount,
    ];

    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorCount => "error_count",
            Self::ResponseTime => "response_time",
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::RequestCount => "request_count",
        }
    }

    /// Counting metrics report a per-window total instead of a sample mean.
    #[must_use]
    pub const fn is_counter(&self) -> bool {
        matches!(self, Self::ErrorCount)
    }

    /// The anomaly type a z-score deviation on this metric is tagged with.
    #[must_use]
    pub const fn anomaly_type(&self) -> AnomalyType {
        match self {
            Self::ErrorCount => AnomalyType::ErrorSpike,
            Self::ResponseTime => AnomalyType::ResponseTime,
            Self::CpuUsage => AnomalyType::CpuSpike,
            Self::MemoryUsage => AnomalyType::MemorySpike,
            Self::RequestCount => AnomalyType::TrafficAnomaly,
        }
    }

    /// Extracts this metric's observation from a record.
    ///
    /// `error_count` observes every record (1 for errors, 0 otherwise); gauges
    /// observe only records that carry the field.
    #[must_use]
    pub fn observe(&self, record: &LogRecord) -> Option<f64> {
        match self {
            Self::ErrorCount => Some(if record.is_error() { 1.0 } else { 0.0 }),
            Self::ResponseTime => record.response_time_ms,
            Self::CpuUsage => record.cpu_percent,
            Self::MemoryUsage => record.memory_percent,
            Self::RequestCount => record.request_count,
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of deviation an [`AnomalyEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// Error count above baseline.
    ErrorSpike,
    /// Response time above baseline.
    ResponseTime,
    /// CPU utilization above baseline.
    CpuSpike,
    /// Memory utilization above baseline.
    MemorySpike,
    /// Request volume above baseline.
    TrafficAnomaly,
    /// A single response exceeded the absolute slow-query ceiling.
    SlowQuery,
}

impl AnomalyType {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ErrorSpike => "error_spike",
            Self::ResponseTime => "response_time",
            Self::CpuSpike => "cpu_spike",
            Self::MemorySpike => "memory_spike",
            Self::TrafficAnomaly => "traffic_anomaly",
            Self::SlowQuery => "slow_query",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a scored window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Within expectations; never emitted as an event.
    #[default]
    Normal,
    /// Noticeably above baseline.
    Warning,
    /// Far above baseline.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Priority of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// No action needed soon.
    Low,
    /// Should be scheduled.
    Medium,
    /// Should be handled today.
    High,
    /// Needs immediate action.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the time range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the time range (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a new time range.
    ///
    /// # Panics
    /// Panics if start is after end in debug builds.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start <= end, "start must be before or equal to end");
        Self { start, end }
    }

    /// A zero-length range at `instant`.
    #[must_use]
    pub const fn at(instant: DateTime<Utc>) -> Self {
        Self {
            start: instant,
            end: instant,
        }
    }

    /// Returns the duration of this time range.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns true if the given timestamp is within this range.
    #[must_use]
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp < self.end
    }

    /// Grows the range to cover `timestamp`.
    pub fn extend_to(&mut self, timestamp: DateTime<Utc>) {
        if timestamp < self.start {
            self.start = timestamp;
        }
        if timestamp > self.end {
            self.end = timestamp;
        }
    }
}

/// Aggregated state of one metric over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    /// Which metric this window aggregates.
    pub metric_key: MetricKey,
    /// Window start (inclusive).
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end: DateTime<Utc>,
    /// Number of observations folded in.
    pub sample_count: u64,
    /// Sample mean; for counting metrics, the per-window total.
    pub mean: f64,
    /// Population standard deviation of the samples.
    pub stddev: f64,
    /// Largest sample.
    pub max: f64,
    /// Estimated 95th percentile.
    pub p95: f64,
    /// Services that contributed samples.
    pub services: BTreeSet<String>,
}

impl MetricWindow {
    /// An empty window covering `[start, end)`.
    #[must_use]
    pub fn empty(metric_key: MetricKey, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            metric_key,
            window_start,
            window_end,
            sample_count: 0,
            mean: 0.0,
            stddev: 0.0,
            max: 0.0,
            p95: 0.0,
            services: BTreeSet::new(),
        }
    }

    /// Sets count, mean and stddev (max and p95 default to the mean).
    #[must_use]
    pub const fn with_stats(mut self, sample_count: u64, mean: f64, stddev: f64) -> Self {
        self.sample_count = sample_count;
        self.mean = mean;
        self.stddev = stddev;
        self.max = mean;
        self.p95 = mean;
        self
    }

    /// Sets max and p95.
    #[must_use]
    pub const fn with_extremes(mut self, max: f64, p95: f64) -> Self {
        self.max = max;
        self.p95 = p95;
        self
    }

    /// Adds a contributing service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    /// True for heartbeat windows that saw no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// The window's span.
    #[must_use]
    pub fn span(&self) -> TimeRange {
        TimeRange::new(self.window_start, self.window_end)
    }
}

/// One point of the per-window metric series, for charting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// End of the window.
    pub timestamp: DateTime<Utc>,
    /// ERROR/CRITICAL records in the window.
    pub error_count: f64,
    /// Mean response time in milliseconds.
    pub response_time: f64,
    /// Mean CPU utilization percentage.
    pub cpu_usage: f64,
    /// Mean memory utilization percentage.
    pub memory_usage: f64,
    /// Mean reported request count.
    pub request_count: f64,
    /// True when any metric in the window raised an anomaly.
    pub is_anomaly: bool,
}

impl TimeSeriesPoint {
    /// A zeroed point at `timestamp`.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            error_count: 0.0,
            response_time: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            request_count: 0.0,
            is_anomaly: false,
        }
    }

    /// Takes the value of `window` for its metric.
    ///
    /// Gauges keep the carried-forward mean of heartbeat windows; counters
    /// read zero when the window saw no records.
    pub fn apply(&mut self, window: &MetricWindow) {
        let value = if window.is_empty() && window.metric_key.is_counter() {
            0.0
        } else {
            window.mean
        };
        match window.metric_key {
            MetricKey::ErrorCount => self.error_count = value,
            MetricKey::ResponseTime => self.response_time = value,
            MetricKey::CpuUsage => self.cpu_usage = value,
            MetricKey::MemoryUsage => self.memory_usage = value,
            MetricKey::RequestCount => self.request_count = value,
        }
    }

    /// The value recorded for `key`.
    #[must_use]
    pub const fn value(&self, key: MetricKey) -> f64 {
        match key {
            MetricKey::ErrorCount => self.error_count,
            MetricKey::ResponseTime => self.response_time,
            MetricKey::CpuUsage => self.cpu_usage,
            MetricKey::MemoryUsage => self.memory_usage,
            MetricKey::RequestCount => self.request_count,
        }
    }
}

/// A detected deviation of one metric in one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Deterministic id derived from metric and window end.
    pub id: Uuid,
    /// End of the window that produced the event.
    pub timestamp: DateTime<Utc>,
    /// Which metric deviated.
    pub metric_key: MetricKey,
    /// Kind of anomaly.
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    /// Warning or critical.
    pub severity: Severity,
    /// Anomaly score in `[0, 100]`.
    pub score: f64,
    /// The observed value that was scored.
    pub metric_value: f64,
    /// Value at which the metric becomes anomalous.
    pub threshold: f64,
    /// Human-readable explanation.
    pub description: String,
    /// Deviation in baseline standard deviations.
    pub z_score: f64,
    /// Services that contributed to the window.
    pub services: Vec<String>,
}

impl AnomalyEvent {
    /// Deterministic event id for a metric's window ending at `timestamp`.
    #[must_use]
    pub fn derive_id(metric_key: MetricKey, anomaly_type: AnomalyType, timestamp: DateTime<Utc>) -> Uuid {
        let name = format!("{metric_key}:{anomaly_type}:{}", timestamp.timestamp_millis());
        Uuid::new_v5(&ID_NAMESPACE, name.as_bytes())
    }

    /// Returns true for critical events.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self.severity, Severity::Critical)
    }
}

/// Why a cluster stopped accepting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureReason {
    /// No new event joined within the correlation window.
    Timeout,
    /// The cluster reached its event cap.
    MaxEvents,
    /// The stream ended while the cluster was open.
    Flushed,
}

/// A temporally correlated group of anomalies treated as one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentCluster {
    /// Deterministic id derived from the first member event.
    pub id: Uuid,
    /// Member events in arrival order.
    pub events: Vec<AnomalyEvent>,
    /// Sorted union of member services.
    pub affected_services: Vec<String>,
    /// First to latest member timestamp.
    pub time_span: TimeRange,
    /// Why the cluster closed.
    pub closure: ClosureReason,
}

impl IncidentCluster {
    /// Builds a closed cluster from its events.
    ///
    /// Returns `None` for an empty event list.
    #[must_use]
    pub fn from_events(events: Vec<AnomalyEvent>, closure: ClosureReason) -> Option<Self> {
        let first = events.first()?;
        let id = Uuid::new_v5(&ID_NAMESPACE, first.id.as_bytes());
        let mut time_span = TimeRange::at(first.timestamp);
        let mut services = BTreeSet::new();
        for event in &events {
            time_span.extend_to(event.timestamp);
            services.extend(event.services.iter().cloned());
        }
        Some(Self {
            id,
            events,
            affected_services: services.into_iter().collect(),
            time_span,
            closure,
        })
    }

    /// Number of member events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the cluster has no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct anomaly types present, sorted.
    #[must_use]
    pub fn anomaly_types(&self) -> BTreeSet<AnomalyType> {
        self.events.iter().map(|e| e.anomaly_type).collect()
    }

    /// Distinct metrics present, sorted.
    #[must_use]
    pub fn metric_keys(&self) -> BTreeSet<MetricKey> {
        self.events.iter().map(|e| e.metric_key).collect()
    }

    /// Highest severity among members.
    #[must_use]
    pub fn max_severity(&self) -> Severity {
        self.events
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or_default()
    }

    /// Highest member score.
    #[must_use]
    pub fn peak_score(&self) -> f64 {
        self.events.iter().map(|e| e.score).fold(0.0, f64::max)
    }

    /// Sum of member scores.
    #[must_use]
    pub fn total_score(&self) -> f64 {
        self.events.iter().map(|e| e.score).sum()
    }
}

/// One entry of an incident timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When it happened.
    pub time: DateTime<Utc>,
    /// What happened.
    pub event: String,
}

impl TimelineEntry {
    /// Creates a timeline entry.
    #[must_use]
    pub fn new(time: DateTime<Utc>, event: impl Into<String>) -> Self {
        Self {
            time,
            event: event.into(),
        }
    }
}

/// The explanation produced for one incident cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    /// Deterministic id derived from the cluster.
    pub id: Uuid,
    /// When the incident's last anomaly was observed.
    pub timestamp: DateTime<Utc>,
    /// Explanation of the most likely cause.
    pub root_cause: String,
    /// What the incident affected.
    pub impact_summary: String,
    /// Remediation steps, most impactful first.
    pub recommended_fixes: Vec<String>,
    /// How urgently to act.
    pub priority: Priority,
    /// Services touched by the incident.
    pub affected_services: Vec<String>,
    /// Ordered incident timeline.
    pub incident_timeline: Vec<TimelineEntry>,
    /// Identifier of the rule that matched.
    pub rule_id: String,
    /// Cluster this diagnosis explains.
    pub cluster_id: Uuid,
    /// Share of the cluster's score explained by the matched rule.
    pub confidence: f64,
}

/// Result of diagnosing one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    /// A rule explained the cluster.
    Diagnosed(DiagnosisResult),
    /// No rule matched; the anomaly is real but its cause is unknown.
    Undiagnosed(UndiagnosedClusterError),
}

impl DiagnosisOutcome {
    /// Returns the diagnosis, if any.
    #[must_use]
    pub const fn diagnosis(&self) -> Option<&DiagnosisResult> {
        match self {
            Self::Diagnosed(result) => Some(result),
            Self::Undiagnosed(_) => None,
        }
    }

    /// Returns true when no rule matched.
    #[must_use]
    pub const fn is_undiagnosed(&self) -> bool {
        matches!(self, Self::Undiagnosed(_))
    }
}

impl From<std::result::Result<DiagnosisResult, UndiagnosedClusterError>> for DiagnosisOutcome {
    fn from(result: std::result::Result<DiagnosisResult, UndiagnosedClusterError>) -> Self {
        match result {
            Ok(diagnosis) => Self::Diagnosed(diagnosis),
            Err(undiagnosed) => Self::Undiagnosed(undiagnosed),
        }
    }
}
