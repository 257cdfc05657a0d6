//! Output formatting for CLI commands.
//!
//! Supports text (human-readable) and JSON output formats.

use std::io::Write;

use anyhow::{Context, Result};
use logscope::formatter::{format_outcome, format_report, format_summary};
use logscope::{AnomalyType, DiagnosisOutcome, PipelineReport, RuleTable};

use crate::cli::Format;

/// Output writer that handles both text and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Writes a full report.
    pub fn write_report<W: Write>(&self, writer: &mut W, report: &PipelineReport) -> Result<()> {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, report).context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Text => {
                write!(writer, "{}", format_report(report))?;
                writeln!(writer, "{}", format_summary(report))?;
            }
        }
        Ok(())
    }

    /// Writes one outcome as soon as it is available.
    ///
    /// JSON output writes one compact object per line.
    pub fn write_outcome<W: Write>(&self, writer: &mut W, outcome: &DiagnosisOutcome) -> Result<()> {
        match self.format {
            Format::Json => {
                serde_json::to_writer(&mut *writer, outcome).context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Text => write!(writer, "{}", format_outcome(outcome))?,
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the closing summary of a streaming run.
    pub fn write_stream_summary<W: Write>(&self, writer: &mut W, report: &PipelineReport) -> Result<()> {
        match self.format {
            Format::Json => {
                let summary = serde_json::json!({
                    "stats": report.stats,
                    "dashboard": report.dashboard,
                    "time_series": report.time_series,
                    "health": report.health,
                });
                serde_json::to_writer(&mut *writer, &summary).context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Text => {
                writeln!(writer)?;
                for line in report.health.lines() {
                    writeln!(writer, "{line}")?;
                }
                writeln!(writer, "{}", format_summary(report))?;
            }
        }
        Ok(())
    }

    /// Writes a rule table.
    pub fn write_rules<W: Write>(&self, writer: &mut W, rules: &RuleTable) -> Result<()> {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, rules).context("JSON serialization failed")?;
                writeln!(writer)?;
            }
            Format::Text => {
                writeln!(writer, "Diagnosis Rules")?;
                writeln!(writer, "══════════════════════════════════")?;
                for rule in rules.rules() {
                    let types: Vec<&str> = rule.anomaly_types.iter().map(AnomalyType::as_str).collect();
                    writeln!(writer, "{:<28} {}", rule.id, types.join(" + "))?;
                    writeln!(writer, "  {}", rule.root_cause)?;
                    writeln!(writer, "  {} fix(es)", rule.fixes.len())?;
                }
            }
        }
        Ok(())
    }
}
