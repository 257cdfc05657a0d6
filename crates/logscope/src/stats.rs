//! Ingest statistics, dashboard aggregates and health signals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RejectReason;
use crate::normalizer::Normalized;
use crate::types::{DiagnosisOutcome, LogRecord};

/// Counters kept by the pipeline while it ingests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Rows accepted by the normalizer.
    pub accepted: u64,
    /// Rejected rows keyed by reason code.
    pub rejected: BTreeMap<String, u64>,
    /// Accepted records dropped because their window was already sealed.
    pub late_records: u64,
    /// Accepted rows whose level defaulted to INFO.
    pub defaulted_levels: u64,
    /// Negative or non-finite values discarded.
    pub dropped_values: u64,
    /// Metric windows sealed.
    pub windows_sealed: u64,
    /// Anomaly events emitted.
    pub anomalies_emitted: u64,
    /// Incident clusters closed.
    pub clusters_closed: u64,
    /// Clusters explained by a rule.
    pub diagnosed: u64,
    /// Clusters no rule matched.
    pub undiagnosed: u64,
}

impl IngestStats {
    /// Counts an accepted row and its warnings.
    pub fn record_accepted(&mut self, normalized: &Normalized) {
        self.accepted += 1;
        if normalized.level_defaulted() {
            self.defaulted_levels += 1;
        }
        self.dropped_values += normalized.dropped_values() as u64;
    }

    /// Counts a rejected row.
    pub fn record_rejected(&mut self, reason: &RejectReason) {
        *self.rejected.entry(reason.code().to_string()).or_insert(0) += 1;
    }

    /// Counts a late record.
    pub fn record_late(&mut self) {
        self.late_records += 1;
    }

    /// Counts a diagnosis outcome.
    pub fn record_outcome(&mut self, outcome: &DiagnosisOutcome) {
        if outcome.is_undiagnosed() {
            self.undiagnosed += 1;
        } else {
            self.diagnosed += 1;
        }
    }

    /// Total rejected rows.
    #[must_use]
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    /// Rows seen, accepted or not.
    #[must_use]
    pub fn rows_seen(&self) -> u64 {
        self.accepted + self.rejected_total()
    }

    /// Share of rows that did not make it into a window.
    #[must_use]
    pub fn error_ratio(&self) -> f64 {
        let seen = self.rows_seen();
        if seen == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = (self.rejected_total() + self.late_records) as f64 / seen as f64;
        ratio
    }
}

/// Headline numbers for a dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    /// Accepted records.
    pub total_logs: u64,
    /// Accepted ERROR/CRITICAL records.
    pub total_errors: u64,
    /// Anomaly events emitted during the run.
    pub anomalies_today: u64,
    /// Highest CPU utilization observed.
    pub highest_cpu_spike: f64,
    /// Mean response time over records that reported one.
    pub avg_response_time: f64,
    /// Highest memory utilization observed.
    pub memory_peak: f64,
    #[serde(skip)]
    response_time_sum: f64,
    #[serde(skip)]
    response_time_count: u64,
}

impl DashboardStats {
    /// Folds an accepted record in.
    pub fn record(&mut self, record: &LogRecord) {
        self.total_logs += 1;
        if record.is_error() {
            self.total_errors += 1;
        }
        if let Some(cpu) = record.cpu_percent {
            self.highest_cpu_spike = self.highest_cpu_spike.max(cpu);
        }
        if let Some(memory) = record.memory_percent {
            self.memory_peak = self.memory_peak.max(memory);
        }
        if let Some(ms) = record.response_time_ms {
            self.response_time_sum += ms;
            self.response_time_count += 1;
            #[allow(clippy::cast_precision_loss)]
            let avg = self.response_time_sum / self.response_time_count as f64;
            self.avg_response_time = avg;
        }
    }

    /// Counts an emitted anomaly.
    pub fn record_anomaly(&mut self) {
        self.anomalies_today += 1;
    }
}

/// Independent health signals for a run.
///
/// The three signals are reported side by side; none implies the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Anomaly events found.
    pub anomalies_found: u64,
    /// True when too many rows were rejected or late for detection to be trusted.
    pub detection_degraded: bool,
    /// Share of rows rejected or late.
    pub error_ratio: f64,
    /// Incidents no rule could explain.
    pub undiagnosed_incidents: u64,
}

impl HealthSummary {
    /// Derives the signals from ingest counters.
    #[must_use]
    pub fn from_stats(stats: &IngestStats, degraded_error_ratio: f64) -> Self {
        let error_ratio = stats.error_ratio();
        Self {
            anomalies_found: stats.anomalies_emitted,
            detection_degraded: error_ratio > degraded_error_ratio,
            error_ratio,
            undiagnosed_incidents: stats.undiagnosed,
        }
    }

    /// One line per signal, for human output.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(3);
        lines.push(if self.anomalies_found == 0 {
            "No anomalies".to_string()
        } else {
            format!("{} anomalies found", self.anomalies_found)
        });
        if self.detection_degraded {
            lines.push(format!(
                "Detection degraded: {:.1}% of rows rejected or late",
                self.error_ratio * 100.0
            ));
        }
        if self.undiagnosed_incidents > 0 {
            lines.push(format!(
                "{} incident(s) detected with unknown cause",
                self.undiagnosed_incidents
            ));
        }
        lines
    }
}
