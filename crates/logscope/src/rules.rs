//! Declarative diagnosis rules.
//!
//! A [`RuleTable`] maps combinations of anomaly types to a root cause and a
//! pre-ranked list of fixes. Tables are plain data: the built-in table is
//! [`RuleTable::default`], and alternatives can be loaded from JSON.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::types::AnomalyType;

/// Placeholder replaced with the affected services when a cause is rendered.
pub const SERVICES_PLACEHOLDER: &str = "{services}";

/// One diagnosis rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRule {
    /// Stable identifier, also the tie-breaker between equally weighted rules.
    pub id: String,
    /// Anomaly types that must all be present for the rule to match.
    pub anomaly_types: BTreeSet<AnomalyType>,
    /// Root-cause template. May contain `{services}`.
    pub root_cause: String,
    /// Remediation steps, most impactful first.
    pub fixes: Vec<String>,
}

impl DiagnosisRule {
    /// Creates a rule with no fixes.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        anomaly_types: impl IntoIterator<Item = AnomalyType>,
        root_cause: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            anomaly_types: anomaly_types.into_iter().collect(),
            root_cause: root_cause.into(),
            fixes: Vec::new(),
        }
    }

    /// Appends a fix.
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    /// Appends several fixes in order.
    #[must_use]
    pub fn with_fixes<I, S>(mut self, fixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixes.extend(fixes.into_iter().map(Into::into));
        self
    }

    /// True when every type the rule requires is present.
    #[must_use]
    pub fn matches(&self, present: &BTreeSet<AnomalyType>) -> bool {
        self.anomaly_types.is_subset(present)
    }

    /// Renders the root cause for the given services.
    #[must_use]
    pub fn render_root_cause(&self, services: &[String]) -> String {
        let names = if services.is_empty() {
            "the monitored services".to_string()
        } else {
            services.join(", ")
        };
        self.root_cause.replace(SERVICES_PLACEHOLDER, &names)
    }
}

/// An ordered, validated set of diagnosis rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRuleTable", into = "RawRuleTable")]
pub struct RuleTable {
    rules: Vec<DiagnosisRule>,
}

#[derive(Serialize, Deserialize)]
struct RawRuleTable {
    rules: Vec<DiagnosisRule>,
}

impl TryFrom<RawRuleTable> for RuleTable {
    type Error = ConfigError;

    fn try_from(raw: RawRuleTable) -> std::result::Result<Self, Self::Error> {
        Self::new(raw.rules)
    }
}

impl From<RuleTable> for RawRuleTable {
    fn from(table: RuleTable) -> Self {
        Self { rules: table.rules }
    }
}

impl RuleTable {
    /// Builds a table from rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRuleTable`] when the table is empty, an id
    /// repeats, or a rule has no types or no fixes.
    pub fn new(rules: Vec<DiagnosisRule>) -> std::result::Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(invalid("table has no rules"));
        }
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(invalid("rule with empty id"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(invalid(format!("duplicate rule id '{}'", rule.id)));
            }
            if rule.anomaly_types.is_empty() {
                return Err(invalid(format!("rule '{}' requires no anomaly types", rule.id)));
            }
            if rule.fixes.is_empty() {
                return Err(invalid(format!("rule '{}' has no fixes", rule.id)));
            }
        }
        Ok(Self { rules })
    }

    /// Parses a JSON table of the form `{"rules": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the table is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON table from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the table is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The rules in table order.
    #[must_use]
    pub fn rules(&self) -> &[DiagnosisRule] {
        &self.rules
    }

    /// Looks a rule up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DiagnosisRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Always false for a validated table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRuleTable {
        reason: reason.into(),
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        use AnomalyType::{CpuSpike, ErrorSpike, MemorySpike, ResponseTime, SlowQuery, TrafficAnomaly};

        let rules = vec![
            DiagnosisRule::new(
                "connection_pool_exhaustion",
                [SlowQuery, ErrorSpike],
                "Database connection pool exhaustion in {services}: slow queries held connections \
                 until new requests timed out, producing a cascade of errors.",
            )
            .with_fixes([
                "Add indexes for the slow query pattern to avoid full table scans",
                "Increase the connection pool size",
                "Set a query timeout with a circuit breaker in front of the database",
                "Cache results of frequently repeated read queries",
                "Move heavy read traffic to read replicas",
            ]),
            DiagnosisRule::new(
                "cpu_saturation",
                [CpuSpike],
                "CPU saturation in {services}: compute demand exceeded available capacity.",
            )
            .with_fixes([
                "Profile the hottest code paths and optimize them",
                "Scale out compute instances or raise CPU limits",
                "Throttle or defer CPU-heavy background jobs",
            ]),
            DiagnosisRule::new(
                "error_burst",
                [ErrorSpike],
                "Burst of application errors in {services} without a matching resource or latency signal.",
            )
            .with_fixes([
                "Inspect the most frequent error codes in the incident window",
                "Check recent deployments and configuration changes and roll back if needed",
                "Verify the health of downstream dependencies",
            ]),
            DiagnosisRule::new(
                "latency_cascade",
                [ResponseTime, ErrorSpike],
                "Latency cascade in {services}: requests slowed until callers timed out and failed.",
            )
            .with_fixes([
                "Add timeouts and circuit breakers on calls to slow dependencies",
                "Identify the slowest dependency and scale or optimize it",
                "Apply backoff to retries to avoid retry storms",
            ]),
            DiagnosisRule::new(
                "latency_regression",
                [ResponseTime],
                "Response time regression in {services}.",
            )
            .with_fixes([
                "Compare request latency before and after the most recent deployment",
                "Check dependency latency and connection reuse",
                "Review recently added synchronous work on the request path",
            ]),
            DiagnosisRule::new(
                "memory_leak",
                [MemorySpike],
                "Memory growth in {services} consistent with a leak or unbounded cache.",
            )
            .with_fixes([
                "Capture a heap profile and look for objects that are never released",
                "Bound in-memory caches and queues",
                "Restart affected instances to restore headroom while the leak is fixed",
            ]),
            DiagnosisRule::new(
                "query_saturation",
                [SlowQuery, CpuSpike],
                "Expensive queries in {services} saturated the database host CPU.",
            )
            .with_fixes([
                "Add indexes for the slow query pattern to avoid full table scans",
                "Rewrite the query to reduce rows examined",
                "Scale up the database instance CPU",
                "Cache results of frequently repeated read queries",
            ]),
            DiagnosisRule::new(
                "resource_exhaustion",
                [CpuSpike, MemorySpike],
                "Host resource exhaustion in {services}: CPU and memory were both under pressure.",
            )
            .with_fixes([
                "Scale up or scale out the affected hosts",
                "Identify the process consuming the most CPU and memory",
                "Set resource limits so one workload cannot starve others",
            ]),
            DiagnosisRule::new(
                "slow_query",
                [SlowQuery],
                "Slow database queries in {services} exceeded the response time ceiling.",
            )
            .with_fixes([
                "Add indexes for the slow query pattern to avoid full table scans",
                "Set a query timeout",
                "Enable slow query logging to capture the offending statements",
            ]),
            DiagnosisRule::new(
                "traffic_overload",
                [TrafficAnomaly, ResponseTime],
                "Traffic surge in {services} exceeded serving capacity and raised response times.",
            )
            .with_fixes([
                "Scale out the serving tier or enable autoscaling",
                "Apply rate limiting to the heaviest clients",
                "Serve cacheable responses from a cache or CDN",
            ]),
        ];

        Self { rules }
    }
}
