//! Record normalization.
//!
//! Turns loosely typed [`RawRow`]s, as decoded by an upload or API layer from
//! CSV or JSON, into canonical [`LogRecord`]s. Rows that cannot be trusted are
//! rejected with a [`RejectReason`]; recoverable oddities (unknown level,
//! negative numbers) are accepted with a [`NormalizeWarning`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RejectReason;
use crate::types::{LogLevel, LogRecord};

/// Column names of the CSV upload contract, in order.
pub const CSV_COLUMNS: [&str; 8] = [
    "timestamp",
    "log_level",
    "message",
    "error_code",
    "response_time",
    "cpu_usage",
    "memory_usage",
    "request_count",
];

/// A raw ingested row before validation.
///
/// Every field is optional here; the normalizer decides what is required.
/// Numeric fields accept JSON numbers and numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// RFC 3339 string, naive `YYYY-MM-DD HH:MM:SS` (UTC), or epoch millis.
    #[serde(default)]
    pub timestamp: Option<Value>,
    /// Level name.
    #[serde(default, alias = "level", alias = "severity")]
    pub log_level: Option<String>,
    /// Log message.
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
    /// Application error code.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Response time in milliseconds.
    #[serde(default)]
    pub response_time: Option<Value>,
    /// CPU utilization percentage.
    #[serde(default)]
    pub cpu_usage: Option<Value>,
    /// Memory utilization percentage.
    #[serde(default)]
    pub memory_usage: Option<Value>,
    /// Request count.
    #[serde(default)]
    pub request_count: Option<Value>,
    /// Emitting service.
    #[serde(default)]
    pub service: Option<String>,
}

impl RawRow {
    /// Builds a row from already-split `(column, value)` pairs, as produced by
    /// a CSV reader using [`CSV_COLUMNS`]. Unknown columns are ignored and blank
    /// values are treated as absent.
    #[must_use]
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut row = Self::default();
        for (column, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let text = || Some(value.to_string());
            let raw = || Some(Value::String(value.to_string()));
            match column.trim().to_lowercase().as_str() {
                "timestamp" => row.timestamp = raw(),
                "log_level" | "level" | "severity" => row.log_level = text(),
                "message" | "msg" => row.message = text(),
                "error_code" => row.error_code = text(),
                "response_time" => row.response_time = raw(),
                "cpu_usage" => row.cpu_usage = raw(),
                "memory_usage" => row.memory_usage = raw(),
                "request_count" => row.request_count = raw(),
                "service" => row.service = text(),
                _ => {}
            }
        }
        row
    }
}

/// A recoverable problem found while normalizing an accepted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", content = "detail", rename_all = "snake_case")]
pub enum NormalizeWarning {
    /// The level was missing or unrecognized and defaulted to INFO.
    UnknownLevel(Option<String>),
    /// A negative or non-finite number was discarded for this field.
    DroppedValue(String),
}

/// An accepted row.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The canonical record.
    pub record: LogRecord,
    /// Recoverable problems found along the way.
    pub warnings: Vec<NormalizeWarning>,
}

impl Normalized {
    /// True if the level had to be defaulted.
    #[must_use]
    pub fn level_defaulted(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, NormalizeWarning::UnknownLevel(_)))
    }

    /// Number of numeric values discarded.
    #[must_use]
    pub fn dropped_values(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, NormalizeWarning::DroppedValue(_)))
            .count()
    }

    /// Discards the warnings.
    #[must_use]
    pub fn into_record(self) -> LogRecord {
        self.record
    }
}

/// Validates and coerces one raw row.
///
/// Pure: the caller counts and reports rejects.
///
/// # Errors
///
/// Returns the [`RejectReason`] when the timestamp or message is missing, the
/// timestamp is unparseable, or a numeric field holds non-numeric text.
pub fn normalize(row: &RawRow) -> Result<Normalized, RejectReason> {
    let timestamp = parse_timestamp(row.timestamp.as_ref())?;

    let message = row
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(RejectReason::MissingMessage)?;

    let mut warnings = Vec::new();

    let level = match row.log_level.as_deref().and_then(parse_level) {
        Some(level) => level,
        None => {
            warnings.push(NormalizeWarning::UnknownLevel(row.log_level.clone()));
            LogLevel::Info
        }
    };

    let mut record = LogRecord::new(timestamp, level, message);
    record.error_code = non_blank(row.error_code.as_deref());
    record.service = non_blank(row.service.as_deref());
    record.response_time_ms = parse_metric("response_time", row.response_time.as_ref(), &mut warnings)?;
    record.cpu_percent = parse_metric("cpu_usage", row.cpu_usage.as_ref(), &mut warnings)?;
    record.memory_percent = parse_metric("memory_usage", row.memory_usage.as_ref(), &mut warnings)?;
    record.request_count = parse_metric("request_count", row.request_count.as_ref(), &mut warnings)?;

    Ok(Normalized { record, warnings })
}

/// Maps a level name to [`LogLevel`], case-insensitively.
///
/// Returns `None` for unrecognized names.
#[must_use]
pub fn parse_level(s: &str) -> Option<LogLevel> {
    match s.trim().to_lowercase().as_str() {
        "trace" | "trc" | "debug" | "dbg" => Some(LogLevel::Debug),
        "info" | "inf" | "information" => Some(LogLevel::Info),
        "warn" | "warning" | "wrn" => Some(LogLevel::Warn),
        "error" | "err" => Some(LogLevel::Error),
        "critical" | "crit" | "fatal" => Some(LogLevel::Critical),
        _ => None,
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, RejectReason> {
    match value {
        None | Some(Value::Null) => Err(RejectReason::MissingTimestamp),
        Some(Value::String(s)) if s.trim().is_empty() => Err(RejectReason::MissingTimestamp),
        Some(Value::String(s)) => parse_timestamp_str(s.trim())
            .ok_or_else(|| RejectReason::InvalidTimestamp(s.clone())),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| RejectReason::InvalidTimestamp(n.to_string())),
        Some(other) => Err(RejectReason::InvalidTimestamp(other.to_string())),
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

fn parse_metric(
    field: &str,
    value: Option<&Value>,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<Option<f64>, RejectReason> {
    let number = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<f64>()
                .map_err(|_| RejectReason::MalformedNumber(field.to_string()))?,
        ),
        Some(_) => return Err(RejectReason::MalformedNumber(field.to_string())),
    };

    match number {
        Some(n) if n.is_finite() && n >= 0.0 => Ok(Some(n)),
        _ => {
            warnings.push(NormalizeWarning::DroppedValue(field.to_string()));
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn row(value: serde_json::Value) -> RawRow {
        serde_json::from_value(value).expect("row should deserialize in test")
    }

    fn valid() -> serde_json::Value {
        json!({
            "timestamp": "2024-03-01T14:23:00Z",
            "log_level": "ERROR",
            "message": "Database connection timeout after 30000ms",
            "error_code": "DB_TIMEOUT_001",
            "response_time": 30012,
            "cpu_usage": "45",
            "memory_usage": 67.5,
            "request_count": 234,
            "service": "order-service"
        })
    }

    #[test]
    fn test_full_row_normalizes() {
        let normalized = normalize(&row(valid())).expect("valid row");
        let record = &normalized.record;

        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "Database connection timeout after 30000ms");
        assert_eq!(record.error_code.as_deref(), Some("DB_TIMEOUT_001"));
        assert_eq!(record.response_time_ms, Some(30012.0));
        assert_eq!(record.cpu_percent, Some(45.0));
        assert_eq!(record.memory_percent, Some(67.5));
        assert_eq!(record.request_count, Some(234.0));
        assert_eq!(record.service.as_deref(), Some("order-service"));
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn test_missing_optional_numbers_are_absent_not_zero() {
        let normalized = normalize(&row(json!({
            "timestamp": "2024-03-01T14:23:00Z",
            "log_level": "INFO",
            "message": "ok"
        })))
        .expect("valid row");

        assert_eq!(normalized.record.response_time_ms, None);
        assert_eq!(normalized.record.cpu_percent, None);
        assert_eq!(normalized.record.memory_percent, None);
        assert_eq!(normalized.record.request_count, None);
    }

    #[test_case(json!({"log_level": "INFO", "message": "m"}), RejectReason::MissingTimestamp ; "no timestamp")]
    #[test_case(json!({"timestamp": "  ", "log_level": "INFO", "message": "m"}), RejectReason::MissingTimestamp ; "blank timestamp")]
    #[test_case(json!({"timestamp": "2024-03-01T14:23:00Z", "log_level": "INFO"}), RejectReason::MissingMessage ; "no message")]
    #[test_case(json!({"timestamp": "2024-03-01T14:23:00Z", "message": ""}), RejectReason::MissingMessage ; "empty message")]
    #[test_case(json!({"timestamp": "yesterday", "message": "m"}), RejectReason::InvalidTimestamp("yesterday".to_string()) ; "garbage timestamp")]
    #[test_case(json!({"timestamp": "2024-03-01T14:23:00Z", "message": "m", "cpu_usage": "high"}), RejectReason::MalformedNumber("cpu_usage".to_string()) ; "text in cpu")]
    #[test_case(json!({"timestamp": "2024-03-01T14:23:00Z", "message": "m", "response_time": true}), RejectReason::MalformedNumber("response_time".to_string()) ; "bool in response time")]
    fn test_rejections(value: serde_json::Value, expected: RejectReason) {
        assert_eq!(normalize(&row(value)), Err(expected));
    }

    #[test_case("2024-03-01T14:23:00Z" ; "rfc3339 utc")]
    #[test_case("2024-03-01T15:23:00+01:00" ; "rfc3339 offset")]
    #[test_case("2024-03-01 14:23:00" ; "naive space")]
    #[test_case("2024-03-01T14:23:00.000" ; "naive t with fraction")]
    #[test_case("1709302980000" ; "epoch millis string")]
    fn test_timestamp_formats(ts: &str) {
        let normalized = normalize(&row(json!({"timestamp": ts, "message": "m", "log_level": "INFO"})))
            .expect("valid timestamp");
        assert_eq!(normalized.record.timestamp.timestamp(), 1_709_302_980);
    }

    #[test]
    fn test_numeric_epoch_timestamp() {
        let normalized = normalize(&row(json!({"timestamp": 1_709_303_000_000_i64, "message": "m"})))
            .expect("valid timestamp");
        assert_eq!(normalized.record.timestamp.timestamp(), 1_709_303_000);
    }

    #[test_case("warning", LogLevel::Warn)]
    #[test_case("Err", LogLevel::Error)]
    #[test_case("FATAL", LogLevel::Critical)]
    #[test_case("trace", LogLevel::Debug)]
    #[test_case(" info ", LogLevel::Info)]
    fn test_level_aliases(input: &str, expected: LogLevel) {
        assert_eq!(parse_level(input), Some(expected));
    }

    #[test]
    fn test_unknown_level_defaults_to_info_with_warning() {
        let mut value = valid();
        value["log_level"] = json!("NOTICE");
        let normalized = normalize(&row(value)).expect("unknown level is not a rejection");
        assert_eq!(normalized.record.level, LogLevel::Info);
        assert!(normalized.level_defaulted());
    }

    #[test]
    fn test_missing_level_defaults_to_info_with_warning() {
        let normalized = normalize(&row(json!({"timestamp": "2024-03-01T14:23:00Z", "message": "m"})))
            .expect("missing level is not a rejection");
        assert_eq!(normalized.record.level, LogLevel::Info);
        assert_eq!(normalized.warnings, vec![NormalizeWarning::UnknownLevel(None)]);
    }

    #[test]
    fn test_negative_number_is_dropped_with_warning() {
        let mut value = valid();
        value["response_time"] = json!(-5);
        let normalized = normalize(&row(value)).expect("negative is not a rejection");
        assert_eq!(normalized.record.response_time_ms, None);
        assert_eq!(normalized.dropped_values(), 1);
    }

    #[test]
    fn test_level_alias_field_names() {
        let normalized = normalize(&row(json!({
            "timestamp": "2024-03-01T14:23:00Z",
            "level": "critical",
            "msg": "pool exhausted"
        })))
        .expect("aliases accepted");
        assert_eq!(normalized.record.level, LogLevel::Critical);
        assert_eq!(normalized.record.message, "pool exhausted");
    }

    #[test]
    fn test_from_pairs_uses_csv_columns() {
        let values = [
            "2024-03-01T14:23:00Z",
            "CRITICAL",
            "Connection pool exhausted - cannot acquire connection",
            "POOL_EXHAUSTED",
            "",
            "78",
            "82",
            "456",
        ];
        let raw = RawRow::from_pairs(CSV_COLUMNS.iter().copied().zip(values));
        let normalized = normalize(&raw).expect("csv row");

        assert_eq!(normalized.record.level, LogLevel::Critical);
        assert_eq!(normalized.record.error_code.as_deref(), Some("POOL_EXHAUSTED"));
        assert_eq!(normalized.record.response_time_ms, None);
        assert_eq!(normalized.record.cpu_percent, Some(78.0));
        assert_eq!(normalized.record.request_count, Some(456.0));
    }
}
