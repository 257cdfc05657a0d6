//! Rule-based root-cause diagnosis of incident clusters.

use std::cmp::Ordering;
use std::fmt::Write as _;

use chrono::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ConfigError, UndiagnosedClusterError};
use crate::rules::{DiagnosisRule, RuleTable};
use crate::types::{
    ClosureReason, DiagnosisOutcome, DiagnosisResult, IncidentCluster, Priority, Severity, TimelineEntry, ID_NAMESPACE,
};

/// Explains incident clusters using a [`RuleTable`].
#[derive(Debug, Clone)]
pub struct DiagnosisEngine {
    rules: RuleTable,
    warning_score: f64,
    critical_score: f64,
    correlation_window: Duration,
}

impl Default for DiagnosisEngine {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            rules: RuleTable::default(),
            warning_score: config.scorer.warning_score,
            critical_score: config.scorer.critical_score,
            correlation_window: config.correlator.correlation_window(),
        }
    }
}

impl DiagnosisEngine {
    /// Creates an engine using `rules` and the thresholds in `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` is invalid.
    pub fn new(rules: RuleTable, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            rules,
            warning_score: config.scorer.warning_score,
            critical_score: config.scorer.critical_score,
            correlation_window: config.correlator.correlation_window(),
        })
    }

    /// The rule table in use.
    #[must_use]
    pub const fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Diagnoses a cluster.
    ///
    /// # Errors
    ///
    /// Returns [`UndiagnosedClusterError`] when no rule matches the cluster's
    /// anomaly types.
    pub fn diagnose(&self, cluster: &IncidentCluster) -> Result<DiagnosisResult, UndiagnosedClusterError> {
        let Some((rule, weight)) = self.best_rule(cluster) else {
            let types: Vec<_> = cluster.anomaly_types().into_iter().collect();
            debug!(cluster_id = %cluster.id, anomaly_types = ?types, "No diagnosis rule matched");
            return Err(UndiagnosedClusterError {
                cluster_id: cluster.id,
                anomaly_types: types,
                affected_services: cluster.affected_services.clone(),
                time_span: cluster.time_span,
                peak_score: cluster.peak_score(),
            });
        };

        let total = cluster.total_score();
        let confidence = if total > 0.0 { (weight / total).clamp(0.0, 1.0) } else { 0.0 };
        let priority = self.priority(cluster);

        info!(
            cluster_id = %cluster.id,
            rule = %rule.id,
            priority = %priority,
            confidence,
            "Incident diagnosed"
        );

        Ok(DiagnosisResult {
            id: Uuid::new_v5(&ID_NAMESPACE, format!("diagnosis:{}", cluster.id).as_bytes()),
            timestamp: cluster.time_span.end,
            root_cause: rule.render_root_cause(&cluster.affected_services),
            impact_summary: impact_summary(cluster),
            recommended_fixes: rule.fixes.clone(),
            priority,
            affected_services: cluster.affected_services.clone(),
            incident_timeline: self.timeline(cluster),
            rule_id: rule.id.clone(),
            cluster_id: cluster.id,
            confidence,
        })
    }

    /// Diagnoses a cluster, folding the undiagnosed case into the outcome.
    #[must_use]
    pub fn evaluate(&self, cluster: &IncidentCluster) -> DiagnosisOutcome {
        self.diagnose(cluster).into()
    }

    /// The matching rule with the highest weight; ties go to the smallest id.
    fn best_rule(&self, cluster: &IncidentCluster) -> Option<(&DiagnosisRule, f64)> {
        let present = cluster.anomaly_types();
        self.rules
            .rules()
            .iter()
            .filter(|rule| rule.matches(&present))
            .map(|rule| {
                let weight: f64 = cluster
                    .events
                    .iter()
                    .filter(|e| rule.anomaly_types.contains(&e.anomaly_type))
                    .map(|e| e.score)
                    .sum();
                (rule, weight)
            })
            .max_by(|(a, wa), (b, wb)| wa.total_cmp(wb).then_with(|| b.id.cmp(&a.id)))
    }

    fn priority(&self, cluster: &IncidentCluster) -> Priority {
        match cluster.max_severity() {
            Severity::Critical => Priority::Critical,
            Severity::Warning => {
                let midpoint = (self.warning_score + self.critical_score) / 2.0;
                match cluster.peak_score().partial_cmp(&midpoint) {
                    Some(Ordering::Less) | None => Priority::Medium,
                    _ => Priority::High,
                }
            }
            Severity::Normal => Priority::Low,
        }
    }

    fn timeline(&self, cluster: &IncidentCluster) -> Vec<TimelineEntry> {
        let mut events: Vec<_> = cluster.events.iter().collect();
        events.sort_by_key(|e| e.timestamp);

        let mut timeline = Vec::with_capacity(events.len() + 2);
        if let Some(first) = events.first() {
            timeline.push(TimelineEntry::new(
                first.timestamp,
                format!("Incident detected: {} on {}", first.anomaly_type, first.metric_key),
            ));
        }
        timeline.extend(
            events
                .iter()
                .map(|e| TimelineEntry::new(e.timestamp, e.description.clone())),
        );
        let recovered = cluster.time_span.end.checked_add_signed(self.correlation_window);
        if let (ClosureReason::Timeout, Some(time)) = (cluster.closure, recovered) {
            timeline.push(TimelineEntry::new(
                time,
                "No further anomalies; metrics returned to baseline",
            ));
        }
        timeline
    }
}

fn impact_summary(cluster: &IncidentCluster) -> String {
    let metrics: Vec<&str> = cluster.metric_keys().iter().map(|k| k.as_str()).collect();
    let services = if cluster.affected_services.is_empty() {
        "unattributed services".to_string()
    } else {
        cluster.affected_services.join(", ")
    };

    let mut summary = format!(
        "{} anomal{} across {} affecting {}",
        cluster.len(),
        if cluster.len() == 1 { "y" } else { "ies" },
        metrics.join(", "),
        services
    );
    let minutes = cluster.time_span.duration().num_minutes();
    if minutes > 0 {
        let _ = write!(summary, " over {minutes} minutes");
    }
    let critical = cluster.events.iter().filter(|e| e.is_critical()).count();
    if critical > 0 {
        let _ = write!(summary, "; {critical} critical");
    }
    summary
}
