//! Command implementations.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use logscope::{spawn_pipeline_with_rules, EngineConfig, Pipeline, PipelineReport, RawRow, RuleTable};
use tracing::info;

use crate::cli::AnalyzeArgs;
use crate::input::read_rows;
use crate::output::OutputFormat;

/// Builds the engine configuration from an optional file plus flag overrides.
pub fn resolve_config(args: &AnalyzeArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(minutes) = args.window_minutes {
        config.windower = config
            .windower
            .with_window_size_seconds(minutes.saturating_mul(60));
    }
    if let Some(minutes) = args.correlation_minutes {
        config.correlator = config
            .correlator
            .with_correlation_window_seconds(minutes.saturating_mul(60));
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Loads a rule table, or the built-in one.
pub fn resolve_rules(path: Option<&Path>) -> Result<RuleTable> {
    match path {
        Some(path) => RuleTable::load(path)
            .with_context(|| format!("invalid rule table in {}", path.display())),
        None => Ok(RuleTable::default()),
    }
}

/// Runs `logscope analyze`.
pub async fn analyze<W: Write>(writer: &mut W, out: &OutputFormat, args: &AnalyzeArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let rules = resolve_rules(args.rules.as_deref())?;
    let rows = read_rows(&args.input)?;

    info!(
        rows = rows.len(),
        window_seconds = config.windower.window_size_seconds,
        correlation_seconds = config.correlator.correlation_window_seconds,
        streaming = args.streaming,
        "starting analysis"
    );

    let report = if args.streaming {
        analyze_streaming(writer, out, config, rules, rows).await?
    } else {
        let report = Pipeline::with_rules(config, rules)?.run_batch(rows);
        out.write_report(writer, &report)?;
        report
    };

    info!(
        anomalies = report.anomalies.len(),
        incidents = report.outcomes.len(),
        degraded = report.health.detection_degraded,
        "analysis complete"
    );
    Ok(())
}

async fn analyze_streaming<W: Write>(
    writer: &mut W,
    out: &OutputFormat,
    config: EngineConfig,
    rules: RuleTable,
    rows: Vec<RawRow>,
) -> Result<PipelineReport> {
    let mut handle = spawn_pipeline_with_rules(config, rules)?;
    let mut outcomes_rx = handle
        .take_outcomes()
        .context("outcome stream already taken")?;
    let mut anomalies_rx = handle
        .take_anomalies()
        .context("anomaly stream already taken")?;

    let feed = async move {
        for row in rows {
            handle.send(row).await?;
        }
        handle.finish().await
    };

    let stream_writer = &mut *writer;
    let print = async move {
        let mut outcomes = Vec::new();
        while let Some(outcome) = outcomes_rx.recv().await {
            out.write_outcome(stream_writer, &outcome)?;
            outcomes.push(outcome);
        }
        Ok::<_, anyhow::Error>(outcomes)
    };

    let collect = async move {
        let mut anomalies = Vec::new();
        while let Some(anomaly) = anomalies_rx.recv().await {
            anomalies.push(anomaly);
        }
        anomalies
    };

    let (report, outcomes, anomalies) = tokio::join!(feed, print, collect);
    let mut report = report?;
    report.outcomes = outcomes?;
    report.anomalies = anomalies;

    out.write_stream_summary(writer, &report)?;
    Ok(report)
}

/// Runs `logscope rules`.
pub fn rules<W: Write>(writer: &mut W, out: &OutputFormat, path: Option<&Path>) -> Result<()> {
    let rules = resolve_rules(path)?;
    out.write_rules(writer, &rules)
}
