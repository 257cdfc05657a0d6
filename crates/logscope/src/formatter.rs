//! Human-readable output formatting for reports.
//!
//! Converts diagnoses, undiagnosed incidents and whole pipeline reports into
//! text for terminals, plus JSON for programmatic consumption.

// Allow format string pushing for readability in formatter functions
#![allow(clippy::format_push_string)]
#![allow(clippy::uninlined_format_args)]

use crate::error::UndiagnosedClusterError;
use crate::pipeline::PipelineReport;
use crate::types::{AnomalyEvent, AnomalyType, DiagnosisOutcome, DiagnosisResult, Priority, Severity};

const HEAVY_RULE: &str = "═══════════════════════════════════════════════════════════════\n";
const LIGHT_RULE: &str = "───────────────────────────────────────────────────────────────\n";

fn priority_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "🚨",
        Priority::High => "🔴",
        Priority::Medium => "⚠️",
        Priority::Low => "ℹ️",
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Warning => "⚠️",
        Severity::Normal => "✅",
    }
}

/// Formats one diagnosis with root cause, fixes and timeline.
#[must_use]
pub fn format_diagnosis(diagnosis: &DiagnosisResult) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{} {} INCIDENT: {}\n",
        priority_emoji(diagnosis.priority),
        diagnosis.priority,
        diagnosis.rule_id
    ));
    output.push_str(LIGHT_RULE);
    output.push_str(&format!("Root cause: {}\n", diagnosis.root_cause));
    output.push_str(&format!("Impact:     {}\n", diagnosis.impact_summary));
    if !diagnosis.affected_services.is_empty() {
        output.push_str(&format!(
            "Services:   {}\n",
            diagnosis.affected_services.join(", ")
        ));
    }
    output.push_str(&format!(
        "Confidence: {:.0}%\n",
        diagnosis.confidence * 100.0
    ));

    if !diagnosis.recommended_fixes.is_empty() {
        output.push_str("\n💡 Recommended fixes:\n");
        for (i, fix) in diagnosis.recommended_fixes.iter().enumerate() {
            output.push_str(&format!("   {}. {fix}\n", i + 1));
        }
    }

    if !diagnosis.incident_timeline.is_empty() {
        output.push_str("\n🕒 Timeline:\n");
        for entry in &diagnosis.incident_timeline {
            output.push_str(&format!(
                "   {}  {}\n",
                entry.time.format("%Y-%m-%d %H:%M:%S"),
                entry.event
            ));
        }
    }

    output
}

/// Formats an incident no rule could explain.
#[must_use]
pub fn format_undiagnosed(incident: &UndiagnosedClusterError) -> String {
    let types: Vec<&str> = incident.anomaly_types.iter().map(AnomalyType::as_str).collect();
    let mut output = String::new();

    output.push_str("\n❓ Anomaly detected, cause unknown\n");
    output.push_str(LIGHT_RULE);
    output.push_str(&format!("Anomaly types: {}\n", types.join(", ")));
    if !incident.affected_services.is_empty() {
        output.push_str(&format!(
            "Services:      {}\n",
            incident.affected_services.join(", ")
        ));
    }
    output.push_str(&format!(
        "Window:        {} to {}\n",
        incident.time_span.start.format("%Y-%m-%d %H:%M:%S"),
        incident.time_span.end.format("%Y-%m-%d %H:%M:%S")
    ));
    output.push_str(&format!("Peak score:    {:.1}\n", incident.peak_score));

    output
}

/// Formats either kind of outcome.
#[must_use]
pub fn format_outcome(outcome: &DiagnosisOutcome) -> String {
    match outcome {
        DiagnosisOutcome::Diagnosed(diagnosis) => format_diagnosis(diagnosis),
        DiagnosisOutcome::Undiagnosed(incident) => format_undiagnosed(incident),
    }
}

/// Formats anomaly events as a bullet list.
#[must_use]
pub fn format_anomaly_list(anomalies: &[AnomalyEvent]) -> String {
    let mut output = String::new();

    for anomaly in anomalies {
        output.push_str(&format!(
            "• {} {} {} score {:.0}: {}\n",
            anomaly.timestamp.format("%Y-%m-%d %H:%M"),
            severity_emoji(anomaly.severity),
            anomaly.anomaly_type,
            anomaly.score,
            truncate_string(&anomaly.description, 80)
        ));
    }

    output
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Formats a report as a one-line summary.
#[must_use]
pub fn format_summary(report: &PipelineReport) -> String {
    let indicator = if report.health.detection_degraded {
        "[DEGRADED]"
    } else if report.outcomes.iter().any(|o| {
        o.diagnosis()
            .is_some_and(|d| d.priority == Priority::Critical)
    }) {
        "[CRIT]"
    } else if report.anomalies.is_empty() {
        "[OK]"
    } else {
        "[WARN]"
    };

    let diagnosed = report.outcomes.iter().filter(|o| !o.is_undiagnosed()).count();
    let undiagnosed = report.outcomes.len() - diagnosed;

    format!(
        "{indicator} {} logs, {} anomalies, {} diagnosed, {} undiagnosed",
        report.dashboard.total_logs,
        report.anomalies.len(),
        diagnosed,
        undiagnosed
    )
}

/// Formats a full report for a terminal.
#[must_use]
pub fn format_report(report: &PipelineReport) -> String {
    let mut output = String::new();

    output.push_str(HEAVY_RULE);
    output.push_str("                    LOGSCOPE ANALYSIS\n");
    output.push_str(HEAVY_RULE);

    let dashboard = &report.dashboard;
    output.push_str(&format!(
        "Logs: {}   Errors: {}   Anomalies: {}\n",
        dashboard.total_logs, dashboard.total_errors, dashboard.anomalies_today
    ));
    output.push_str(&format!(
        "Peak CPU: {:.1}%   Peak memory: {:.1}%   Avg response: {:.0}ms\n",
        dashboard.highest_cpu_spike, dashboard.memory_peak, dashboard.avg_response_time
    ));
    if !report.time_series.is_empty() {
        let flagged = report.time_series.iter().filter(|p| p.is_anomaly).count();
        output.push_str(&format!(
            "Windows: {}   Anomalous windows: {}\n",
            report.time_series.len(),
            flagged
        ));
    }
    output.push_str(LIGHT_RULE);
    for line in report.health.lines() {
        output.push_str(&format!("{line}\n"));
    }
    let rejected = report.stats.rejected_total();
    if rejected > 0 || report.stats.late_records > 0 {
        output.push_str(&format!(
            "Skipped rows: {} rejected, {} late\n",
            rejected, report.stats.late_records
        ));
    }

    if !report.anomalies.is_empty() {
        output.push_str("\n📋 ANOMALIES\n");
        output.push_str(LIGHT_RULE);
        output.push_str(&format_anomaly_list(&report.anomalies));
    }

    for outcome in &report.outcomes {
        output.push_str(&format_outcome(outcome));
    }

    output.push('\n');
    output.push_str(HEAVY_RULE);
    output
}

/// Formats a report as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_as_json(report: &PipelineReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Formats a report as compact JSON (single line).
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_as_json_compact(report: &PipelineReport) -> Result<String, serde_json::Error> {
    serde_json::to_string(report)
}
