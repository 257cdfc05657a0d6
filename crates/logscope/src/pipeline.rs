//! End-to-end pipeline wiring.
//!
//! [`Pipeline`] drives normalization, windowing, scoring, correlation and
//! diagnosis synchronously on the caller's thread. [`spawn_pipeline`] runs the
//! same stages as two tokio tasks connected by bounded channels:
//!
//! ```text
//! rows -> detection task -> anomalies (consumer)
//!                        -> clusters -> diagnosis task -> outcomes (consumer)
//! ```
//!
//! Detection state (windows, baselines, open clusters) is owned by exactly one
//! task. Run one pipeline per partition to scale out.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::correlator::Correlator;
use crate::diagnosis::DiagnosisEngine;
use crate::error::{Error, IngestionError, Result};
use crate::normalizer::{normalize, Normalized, RawRow};
use crate::rules::RuleTable;
use crate::scorer::Scorer;
use crate::stats::{DashboardStats, HealthSummary, IngestStats};
use crate::types::{
    AnomalyEvent, DiagnosisOutcome, DiagnosisResult, IncidentCluster, LogRecord, MetricKey, MetricWindow,
    TimeSeriesPoint,
};
use crate::windower::Windower;

/// What one pipeline step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Anomaly events emitted, in order.
    pub anomalies: Vec<AnomalyEvent>,
    /// Diagnosis outcomes for clusters that closed.
    pub outcomes: Vec<DiagnosisOutcome>,
}

impl StageOutput {
    /// True when nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty() && self.outcomes.is_empty()
    }

    fn extend(&mut self, other: Self) {
        self.anomalies.extend(other.anomalies);
        self.outcomes.extend(other.outcomes);
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// All anomaly events, in emission order.
    pub anomalies: Vec<AnomalyEvent>,
    /// All diagnosis outcomes, in cluster-close order.
    pub outcomes: Vec<DiagnosisOutcome>,
    /// Ingest counters.
    pub stats: IngestStats,
    /// Dashboard aggregates.
    pub dashboard: DashboardStats,
    /// One point per sealed window, in time order.
    pub time_series: Vec<TimeSeriesPoint>,
    /// Health signals.
    pub health: HealthSummary,
}

impl PipelineReport {
    /// Successful diagnoses.
    pub fn diagnoses(&self) -> impl Iterator<Item = &DiagnosisResult> {
        self.outcomes.iter().filter_map(DiagnosisOutcome::diagnosis)
    }
}

/// One message for the async pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineInput {
    /// A raw row to normalize.
    Row(RawRow),
    /// An already normalized record.
    Record(LogRecord),
    /// Wall-clock progress: seal windows and close clusters up to this time.
    AdvanceTo(DateTime<Utc>),
}

impl From<RawRow> for PipelineInput {
    fn from(row: RawRow) -> Self {
        Self::Row(row)
    }
}

impl From<LogRecord> for PipelineInput {
    fn from(record: LogRecord) -> Self {
        Self::Record(record)
    }
}

/// Output of the detection stages for one step.
#[derive(Debug, Default)]
struct Detection {
    anomalies: Vec<AnomalyEvent>,
    clusters: Vec<IncidentCluster>,
}

/// Normalize, window, score and correlate. Single owner of all rolling state.
#[derive(Debug)]
struct Detector {
    windower: Windower,
    scorer: Scorer,
    correlator: Correlator,
    stats: Arc<Mutex<IngestStats>>,
    dashboard: DashboardStats,
    time_series: Vec<TimeSeriesPoint>,
}

impl Detector {
    fn new(config: &EngineConfig, stats: Arc<Mutex<IngestStats>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            windower: Windower::new(config.windower.clone())?,
            scorer: Scorer::new(config.scorer.clone())?,
            correlator: Correlator::new(config.correlator.clone())?,
            stats,
            dashboard: DashboardStats::default(),
            time_series: Vec::new(),
        })
    }

    fn handle(&mut self, input: PipelineInput) -> Detection {
        match input {
            PipelineInput::Row(row) => self.ingest_row(&row),
            PipelineInput::Record(record) => self.ingest_record(&record),
            PipelineInput::AdvanceTo(now) => self.advance_to(now),
        }
    }

    fn ingest_row(&mut self, row: &RawRow) -> Detection {
        match normalize(row) {
            Ok(normalized) => self.window(&normalized.record, Some(&normalized)),
            Err(reason) => {
                debug!(reason = %reason, "Rejected row");
                self.stats.lock().record_rejected(&reason);
                Detection::default()
            }
        }
    }

    fn ingest_record(&mut self, record: &LogRecord) -> Detection {
        self.window(record, None)
    }

    /// Windows an accepted record. `normalized` carries the normalizer's
    /// warnings when the record came from a raw row.
    fn window(&mut self, record: &LogRecord, normalized: Option<&Normalized>) -> Detection {
        let dropped_before = self.windower.dropped_values();
        let result = self.windower.ingest(record);
        let dropped = self.windower.dropped_values() - dropped_before;

        let mut stats = self.stats.lock();
        if let Err(IngestionError::Rejected(reason)) = &result {
            debug!(reason = %reason, "Rejected record");
            stats.record_rejected(reason);
            return Detection::default();
        }
        match normalized {
            Some(normalized) => stats.record_accepted(normalized),
            None => stats.accepted += 1,
        }
        stats.dropped_values += dropped;

        match result {
            Ok(sealed) => {
                drop(stats);
                self.dashboard.record(record);
                self.process(&sealed)
            }
            Err(IngestionError::LateRecord { timestamp, window_start }) => {
                warn!(%timestamp, %window_start, "Dropped late record");
                stats.record_late();
                Detection::default()
            }
            Err(IngestionError::Rejected(_)) => Detection::default(),
        }
    }

    fn advance_to(&mut self, now: DateTime<Utc>) -> Detection {
        let sealed = self.windower.advance_to(now);
        let mut detection = self.process(&sealed);
        let closed = self.correlator.advance_to(now);
        self.count_clusters(closed.len());
        detection.clusters.extend(closed);
        detection
    }

    fn finish(&mut self) -> Detection {
        let sealed = self.windower.flush();
        let mut detection = self.process(&sealed);
        let closed = self.correlator.flush();
        self.count_clusters(closed.len());
        detection.clusters.extend(closed);
        info!(open_clusters = self.correlator.open_clusters(), "Detection finished");
        detection
    }

    fn process(&mut self, sealed: &[MetricWindow]) -> Detection {
        let mut detection = Detection::default();
        if sealed.is_empty() {
            return detection;
        }

        for window in sealed {
            if self
                .time_series
                .last()
                .is_none_or(|point| point.timestamp != window.window_end)
            {
                self.time_series.push(TimeSeriesPoint::new(window.window_end));
            }
            let Some(point) = self.time_series.last_mut() else {
                continue;
            };
            point.apply(window);
            if let Some(event) = self.scorer.observe(window) {
                point.is_anomaly = true;
                self.dashboard.record_anomaly();
                detection.clusters.extend(self.correlator.push(event.clone()));
                detection.anomalies.push(event);
            }
        }
        if let Some(end) = sealed.iter().map(|w| w.window_end).max() {
            detection.clusters.extend(self.correlator.advance_to(end));
        }

        {
            let mut stats = self.stats.lock();
            stats.windows_sealed += sealed.len() as u64;
            stats.anomalies_emitted += detection.anomalies.len() as u64;
            stats.clusters_closed += detection.clusters.len() as u64;
        }
        detection
    }

    fn count_clusters(&self, closed: usize) {
        self.stats.lock().clusters_closed += closed as u64;
    }
}

/// Synchronous pipeline for batch analysis and embedding.
#[derive(Debug)]
pub struct Pipeline {
    config: EngineConfig,
    detector: Detector,
    engine: DiagnosisEngine,
    stats: Arc<Mutex<IngestStats>>,
}

impl Pipeline {
    /// Creates a pipeline with the built-in rule table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_rules(config, RuleTable::default())
    }

    /// Creates a pipeline with a custom rule table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_rules(config: EngineConfig, rules: RuleTable) -> Result<Self> {
        let stats = Arc::new(Mutex::new(IngestStats::default()));
        let detector = Detector::new(&config, Arc::clone(&stats))?;
        let engine = DiagnosisEngine::new(rules, &config)?;
        Ok(Self {
            config,
            detector,
            engine,
            stats,
        })
    }

    /// Seeds a metric's baseline so scoring starts without warm-up.
    #[must_use]
    pub fn with_baseline(mut self, key: MetricKey, mean: f64, stddev: f64) -> Self {
        self.detector.scorer = self.detector.scorer.with_profile(key, mean, stddev);
        self
    }

    /// Normalizes and ingests one raw row.
    pub fn ingest_row(&mut self, row: &RawRow) -> StageOutput {
        let detection = self.detector.ingest_row(row);
        self.diagnose(detection)
    }

    /// Ingests an already normalized record.
    pub fn ingest_record(&mut self, record: &LogRecord) -> StageOutput {
        let detection = self.detector.ingest_record(record);
        self.diagnose(detection)
    }

    /// Seals windows and closes clusters up to `now`.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> StageOutput {
        let detection = self.detector.advance_to(now);
        self.diagnose(detection)
    }

    /// Flushes all open windows and clusters.
    pub fn finish(&mut self) -> StageOutput {
        let detection = self.detector.finish();
        self.diagnose(detection)
    }

    /// Runs a whole batch and returns the report.
    pub fn run_batch<I>(mut self, rows: I) -> PipelineReport
    where
        I: IntoIterator<Item = RawRow>,
    {
        let mut output = StageOutput::default();
        for row in rows {
            output.extend(self.ingest_row(&row));
        }
        output.extend(self.finish());
        self.report(output)
    }

    /// Snapshot of the ingest counters.
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        self.stats.lock().clone()
    }

    /// Dashboard aggregates so far.
    #[must_use]
    pub const fn dashboard(&self) -> &DashboardStats {
        &self.detector.dashboard
    }

    /// Per-window metric series so far.
    #[must_use]
    pub fn time_series(&self) -> &[TimeSeriesPoint] {
        &self.detector.time_series
    }

    /// Health signals so far.
    #[must_use]
    pub fn health(&self) -> HealthSummary {
        HealthSummary::from_stats(&self.stats.lock(), self.config.degraded_error_ratio)
    }

    fn diagnose(&self, detection: Detection) -> StageOutput {
        let outcomes = detection
            .clusters
            .iter()
            .map(|cluster| {
                let outcome = self.engine.evaluate(cluster);
                self.stats.lock().record_outcome(&outcome);
                outcome
            })
            .collect();
        StageOutput {
            anomalies: detection.anomalies,
            outcomes,
        }
    }

    fn report(&self, output: StageOutput) -> PipelineReport {
        PipelineReport {
            anomalies: output.anomalies,
            outcomes: output.outcomes,
            stats: self.stats(),
            dashboard: self.detector.dashboard.clone(),
            time_series: self.detector.time_series.clone(),
            health: self.health(),
        }
    }
}

/// Runs a batch through a fresh pipeline.
///
/// # Errors
///
/// Returns [`Error::Config`] if the configuration is invalid.
pub fn analyze<I>(config: EngineConfig, rows: I) -> Result<PipelineReport>
where
    I: IntoIterator<Item = RawRow>,
{
    Ok(Pipeline::new(config)?.run_batch(rows))
}

/// Handle to a running async pipeline.
///
/// Dropping every input sender ends the stream: the detection task flushes
/// and both tasks finish. Output receivers that are never taken are drained by
/// [`PipelineHandle::finish`]; taken receivers must be read or dropped.
///
/// An untaken receiver holds at most its queue capacity before `finish` is
/// called. Take and read both streams when feeding more input than that.
#[derive(Debug)]
pub struct PipelineHandle {
    input: mpsc::Sender<PipelineInput>,
    anomalies: Option<mpsc::Receiver<AnomalyEvent>>,
    outcomes: Option<mpsc::Receiver<DiagnosisOutcome>>,
    stats: Arc<Mutex<IngestStats>>,
    degraded_error_ratio: f64,
    detection: JoinHandle<(DashboardStats, Vec<TimeSeriesPoint>)>,
    diagnosis: JoinHandle<()>,
}

impl PipelineHandle {
    /// A sender for feeding the pipeline from other tasks.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<PipelineInput> {
        self.input.clone()
    }

    /// Sends one input, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineClosed`] if the detection task has stopped.
    pub async fn send(&self, input: impl Into<PipelineInput>) -> Result<()> {
        self.input
            .send(input.into())
            .await
            .map_err(|_| Error::PipelineClosed)
    }

    /// Takes the anomaly stream.
    pub fn take_anomalies(&mut self) -> Option<mpsc::Receiver<AnomalyEvent>> {
        self.anomalies.take()
    }

    /// Takes the diagnosis outcome stream.
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<DiagnosisOutcome>> {
        self.outcomes.take()
    }

    /// Snapshot of the ingest counters.
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        self.stats.lock().clone()
    }

    /// Closes the input, waits for both tasks and returns the report.
    ///
    /// Anomalies and outcomes are included only for receivers that were not
    /// taken.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if a task panicked.
    pub async fn finish(self) -> Result<PipelineReport> {
        let Self {
            input,
            anomalies,
            outcomes,
            stats,
            degraded_error_ratio,
            detection,
            diagnosis,
        } = self;
        drop(input);

        let (anomalies, outcomes) = tokio::join!(drain(anomalies), drain(outcomes));
        let (dashboard, time_series) = detection.await?;
        diagnosis.await?;

        let stats = stats.lock().clone();
        let health = HealthSummary::from_stats(&stats, degraded_error_ratio);
        Ok(PipelineReport {
            anomalies,
            outcomes,
            stats,
            dashboard,
            time_series,
            health,
        })
    }
}

async fn drain<T>(rx: Option<mpsc::Receiver<T>>) -> Vec<T> {
    let mut items = Vec::new();
    if let Some(mut rx) = rx {
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
    }
    items
}

/// Starts the async pipeline with the built-in rule table.
///
/// Must be called from within a tokio runtime.
///
/// Every queue is bounded, so a slow or absent consumer slows the producer
/// instead of growing memory. The anomaly stream is part of that chain: while
/// its receiver is held but not read (taken, or left in the handle before
/// [`PipelineHandle::finish`]), the detection task blocks after
/// `anomaly_capacity` events and stops reading input until the stream is
/// drained. Read the stream, or drop the receiver to discard events.
///
/// # Errors
///
/// Returns [`Error::Config`] if the configuration is invalid.
pub fn spawn_pipeline(config: EngineConfig) -> Result<PipelineHandle> {
    spawn_pipeline_with_rules(config, RuleTable::default())
}

/// Starts the async pipeline with a custom rule table.
///
/// Queues and backpressure behave as described on [`spawn_pipeline`].
///
/// # Errors
///
/// Returns [`Error::Config`] if the configuration is invalid.
pub fn spawn_pipeline_with_rules(config: EngineConfig, rules: RuleTable) -> Result<PipelineHandle> {
    let stats = Arc::new(Mutex::new(IngestStats::default()));
    let detector = Detector::new(&config, Arc::clone(&stats))?;
    let engine = DiagnosisEngine::new(rules, &config)?;
    let queues = &config.queues;

    let (input_tx, input_rx) = mpsc::channel(queues.input_capacity);
    let (anomaly_tx, anomaly_rx) = mpsc::channel(queues.anomaly_capacity);
    let (cluster_tx, cluster_rx) = mpsc::channel(queues.cluster_capacity);
    let (outcome_tx, outcome_rx) = mpsc::channel(queues.outcome_capacity);

    let detection = tokio::spawn(run_detection(
        detector,
        input_rx,
        anomaly_tx,
        cluster_tx,
        queues.max_pending_clusters,
    ));
    let diagnosis = tokio::spawn(run_diagnosis(engine, cluster_rx, outcome_tx, Arc::clone(&stats)));

    info!(
        input_capacity = queues.input_capacity,
        cluster_capacity = queues.cluster_capacity,
        max_pending_clusters = queues.max_pending_clusters,
        "Pipeline started"
    );

    Ok(PipelineHandle {
        input: input_tx,
        anomalies: Some(anomaly_rx),
        outcomes: Some(outcome_rx),
        stats,
        degraded_error_ratio: config.degraded_error_ratio,
        detection,
        diagnosis,
    })
}

async fn run_detection(
    mut detector: Detector,
    mut input: mpsc::Receiver<PipelineInput>,
    anomaly_tx: mpsc::Sender<AnomalyEvent>,
    cluster_tx: mpsc::Sender<IncidentCluster>,
    max_pending: usize,
) -> (DashboardStats, Vec<TimeSeriesPoint>) {
    let mut anomaly_tx = Some(anomaly_tx);
    let mut backlog: VecDeque<IncidentCluster> = VecDeque::new();
    let mut input_open = true;

    loop {
        if !input_open && backlog.is_empty() {
            break;
        }

        tokio::select! {
            permit = cluster_tx.reserve(), if !backlog.is_empty() => {
                match permit {
                    Ok(permit) => {
                        if let Some(cluster) = backlog.pop_front() {
                            permit.send(cluster);
                        }
                    }
                    Err(_) => {
                        warn!(dropped = backlog.len(), "Diagnosis stage stopped, discarding clusters");
                        backlog.clear();
                    }
                }
            }

            message = input.recv(), if input_open && backlog.len() < max_pending => {
                let detection = if let Some(message) = message {
                    detector.handle(message)
                } else {
                    input_open = false;
                    detector.finish()
                };

                for event in detection.anomalies {
                    let gone = match &anomaly_tx {
                        Some(tx) => tx.send(event).await.is_err(),
                        None => false,
                    };
                    if gone {
                        debug!("Anomaly consumer dropped");
                        anomaly_tx = None;
                    }
                }
                backlog.extend(detection.clusters);
                if backlog.len() >= max_pending {
                    debug!(pending = backlog.len(), "Cluster backlog full, pausing input");
                }
            }
        }
    }

    debug!("Detection task finished");
    (detector.dashboard, detector.time_series)
}

async fn run_diagnosis(
    engine: DiagnosisEngine,
    mut clusters: mpsc::Receiver<IncidentCluster>,
    outcome_tx: mpsc::Sender<DiagnosisOutcome>,
    stats: Arc<Mutex<IngestStats>>,
) {
    let mut outcome_tx = Some(outcome_tx);
    while let Some(cluster) = clusters.recv().await {
        let outcome = engine.evaluate(&cluster);
        stats.lock().record_outcome(&outcome);

        let gone = match &outcome_tx {
            Some(tx) => tx.send(outcome).await.is_err(),
            None => false,
        };
        if gone {
            debug!("Outcome consumer dropped");
            outcome_tx = None;
        }
    }
    debug!("Diagnosis task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::types::{AnomalyType, LogLevel, Priority, Severity};
    use chrono::{Duration, TimeZone};

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
            + Duration::minutes(minutes)
    }

    /// Steady traffic (one routine error per window) for `windows` 15-minute
    /// windows, then one bad window with slow queries and CPU saturation.
    fn incident_records(windows: i64) -> Vec<LogRecord> {
        let mut records = Vec::new();
        for w in 0..windows {
            for i in 0..3 {
                let cpu = 30.0 + f64::from(i32::try_from(i).expect("small"));
                let (level, message) = if i == 0 {
                    (LogLevel::Error, "Payment retry scheduled")
                } else {
                    (LogLevel::Info, "ok")
                };
                records.push(
                    LogRecord::new(ts(w * 15 + i * 4), level, message)
                        .with_cpu(cpu)
                        .with_response_time(120.0)
                        .with_service("order-service"),
                );
            }
        }
        let bad = windows * 15;
        records.push(
            LogRecord::new(ts(bad + 1), LogLevel::Error, "Query timeout on orders")
                .with_cpu(97.0)
                .with_response_time(12_000.0)
                .with_service("order-service"),
        );
        records.push(
            LogRecord::new(ts(bad + 2), LogLevel::Warn, "High CPU")
                .with_cpu(96.0)
                .with_service("order-service"),
        );
        records
    }

    fn rows(records: &[LogRecord]) -> Vec<RawRow> {
        records
            .iter()
            .map(|r| RawRow {
                timestamp: Some(serde_json::json!(r.timestamp.to_rfc3339())),
                log_level: Some(r.level.to_string()),
                message: Some(r.message.clone()),
                cpu_usage: r.cpu_percent.map(|v| serde_json::json!(v)),
                response_time: r.response_time_ms.map(|v| serde_json::json!(v)),
                service: r.service.clone(),
                ..RawRow::default()
            })
            .collect()
    }

    mod sync_tests {
        use super::*;

        #[test]
        fn test_batch_finds_and_diagnoses_incident() {
            let report = Pipeline::new(EngineConfig::default())
                .expect("valid config")
                .run_batch(rows(&incident_records(6)));

            assert!(report.anomalies.iter().any(|a| a.anomaly_type == AnomalyType::SlowQuery));
            assert!(report.anomalies.iter().any(|a| a.anomaly_type == AnomalyType::CpuSpike));
            let diagnosis = report.diagnoses().next().expect("one diagnosis");
            assert_eq!(diagnosis.rule_id, "query_saturation");
            assert_eq!(diagnosis.priority, Priority::Critical);
            assert_eq!(diagnosis.affected_services, vec!["order-service".to_string()]);
            assert_eq!(report.stats.accepted, 20);
            assert_eq!(report.dashboard.total_errors, 7);
            assert!(!report.health.detection_degraded);
        }

        #[test]
        fn test_quiet_stream_has_no_anomalies() {
            let mut records = incident_records(6);
            records.truncate(18);
            let report = analyze(EngineConfig::default(), rows(&records)).expect("valid config");

            assert!(report.anomalies.is_empty());
            assert!(report.outcomes.is_empty());
            assert_eq!(report.health.lines()[0], "No anomalies");
        }

        #[test]
        fn test_rejects_and_late_records_are_counted() {
            let mut pipeline = Pipeline::new(EngineConfig::default()).expect("valid config");
            pipeline.ingest_row(&RawRow {
                message: Some("no timestamp".to_string()),
                ..RawRow::default()
            });
            pipeline.ingest_record(&LogRecord::new(ts(30), LogLevel::Info, "now"));
            pipeline.ingest_record(&LogRecord::new(ts(0), LogLevel::Info, "late"));

            let stats = pipeline.stats();
            assert_eq!(stats.rejected_total(), 1);
            assert_eq!(stats.late_records, 1);
            assert_eq!(stats.accepted, 2);
            assert!(pipeline.health().detection_degraded);
        }

        #[test]
        fn test_advance_to_seals_and_closes() {
            let mut pipeline = Pipeline::new(EngineConfig::default())
                .expect("valid config")
                .with_baseline(MetricKey::CpuUsage, 30.0, 2.0);
            pipeline.ingest_record(&LogRecord::new(ts(1), LogLevel::Info, "hot").with_cpu(95.0));

            let output = pipeline.advance_to(ts(15));
            assert_eq!(output.anomalies.len(), 1);
            assert!(output.outcomes.is_empty());

            let output = pipeline.advance_to(ts(60));
            assert_eq!(output.outcomes.len(), 1);
            assert_eq!(
                output.outcomes[0].diagnosis().map(|d| d.rule_id.as_str()),
                Some("cpu_saturation")
            );
        }

        #[test]
        fn test_row_at_end_of_date_range_is_rejected() {
            let mut pipeline = Pipeline::new(EngineConfig::default()).expect("valid config");
            let output = pipeline.ingest_row(&RawRow {
                timestamp: Some(serde_json::json!(DateTime::<Utc>::MAX_UTC.timestamp_millis())),
                message: Some("edge".to_string()),
                ..RawRow::default()
            });

            assert!(output.is_empty());
            let stats = pipeline.stats();
            assert_eq!(stats.accepted, 0);
            assert_eq!(stats.rejected.get("invalid_timestamp"), Some(&1));
            assert_eq!(pipeline.dashboard().total_logs, 0);
        }

        #[test]
        fn test_invalid_record_values_do_not_poison_baseline() {
            let mut pipeline = Pipeline::new(EngineConfig::default())
                .expect("valid config")
                .with_baseline(MetricKey::CpuUsage, 30.0, 2.0);
            pipeline.ingest_record(&LogRecord::new(ts(1), LogLevel::Info, "bad gauge").with_cpu(f64::NAN));
            pipeline.ingest_record(&LogRecord::new(ts(2), LogLevel::Info, "bad gauge").with_cpu(-4.0));

            let mut cpu_spikes = 0;
            for w in 1..10 {
                let output = pipeline.ingest_record(&LogRecord::new(ts(w * 15 + 1), LogLevel::Info, "hot").with_cpu(99.0));
                cpu_spikes += output
                    .anomalies
                    .iter()
                    .filter(|a| a.anomaly_type == AnomalyType::CpuSpike)
                    .count();
            }

            assert!(cpu_spikes >= 1);
            let stats = pipeline.stats();
            assert_eq!(stats.dropped_values, 2);
            assert_eq!(stats.accepted, 11);
        }

        #[test]
        fn test_single_error_after_quiet_traffic_is_not_critical() {
            let mut records: Vec<LogRecord> = (0..6)
                .flat_map(|w| (0..3).map(move |i| LogRecord::new(ts(w * 15 + i * 4), LogLevel::Info, "ok")))
                .collect();
            records.push(LogRecord::new(ts(91), LogLevel::Error, "Payment declined"));
            let report = analyze(EngineConfig::default(), rows(&records)).expect("valid config");

            assert!(report.anomalies.iter().all(|a| a.severity != Severity::Critical));
            assert!(report.diagnoses().all(|d| d.priority != Priority::Critical));
        }

        #[test]
        fn test_time_series_has_one_point_per_window() {
            let report = analyze(EngineConfig::default(), rows(&incident_records(6))).expect("valid config");

            assert_eq!(report.time_series.len(), 7);
            assert!(report.time_series.windows(2).all(|p| p[0].timestamp < p[1].timestamp));
            assert_eq!(report.time_series[0].timestamp, ts(15));
            assert!((report.time_series[0].error_count - 1.0).abs() < f64::EPSILON);
            assert!(report.time_series[..6].iter().all(|p| !p.is_anomaly));

            let last = report.time_series.last().expect("incident window");
            assert!(last.is_anomaly);
            assert!(last.cpu_usage > 90.0);

            let value = serde_json::to_value(&report).expect("serialize");
            for field in ["timestamp", "error_count", "response_time", "cpu_usage", "memory_usage", "request_count", "is_anomaly"] {
                assert!(value["time_series"][0].get(field).is_some(), "missing {field}");
            }
        }

        #[test]
        fn test_invalid_config_is_rejected_up_front() {
            let config = EngineConfig {
                degraded_error_ratio: 2.0,
                ..EngineConfig::default()
            };
            assert!(matches!(Pipeline::new(config), Err(Error::Config(_))));
        }
    }

    mod async_tests {
        use super::*;

        #[tokio::test]
        async fn test_async_matches_sync() {
            let input = rows(&incident_records(6));
            let expected = analyze(EngineConfig::default(), input.clone()).expect("valid config");

            let handle = spawn_pipeline(EngineConfig::default()).expect("valid config");
            for row in input {
                handle.send(row).await.expect("pipeline open");
            }
            let report = handle.finish().await.expect("tasks finish");

            assert_eq!(report.anomalies, expected.anomalies);
            assert_eq!(report.outcomes, expected.outcomes);
            assert_eq!(report.stats, expected.stats);
            assert_eq!(report.time_series, expected.time_series);
        }

        #[tokio::test]
        async fn test_dropped_consumers_do_not_stall() {
            let queues = QueueConfig {
                input_capacity: 1,
                anomaly_capacity: 1,
                cluster_capacity: 1,
                max_pending_clusters: 1,
                outcome_capacity: 1,
            };
            let mut handle =
                spawn_pipeline(EngineConfig::default().with_queues(queues)).expect("valid config");
            drop(handle.take_anomalies());
            drop(handle.take_outcomes());

            for row in rows(&incident_records(6)) {
                handle.send(row).await.expect("pipeline open");
            }
            let report = handle.finish().await.expect("tasks finish");
            assert!(report.anomalies.is_empty());
            assert!(report.stats.anomalies_emitted > 0);
            assert_eq!(report.stats.diagnosed, 1);
        }

        #[tokio::test]
        async fn test_outcomes_stream_to_consumer() {
            let mut handle = spawn_pipeline(EngineConfig::default()).expect("valid config");
            let mut outcomes = handle.take_outcomes().expect("outcome receiver");
            let sender = handle.sender();

            let feeder = tokio::spawn(async move {
                for row in rows(&incident_records(6)) {
                    if sender.send(row.into()).await.is_err() {
                        break;
                    }
                }
            });
            feeder.await.expect("feeder finishes");
            let report = tokio::spawn(handle.finish());

            let outcome = outcomes.recv().await.expect("one outcome");
            assert!(!outcome.is_undiagnosed());
            assert!(outcomes.recv().await.is_none());
            let report = report.await.expect("join").expect("tasks finish");
            assert!(report.outcomes.is_empty());
        }
    }
}
