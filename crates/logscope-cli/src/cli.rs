//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// logscope - log anomaly detection and root-cause diagnosis.
#[derive(Parser, Debug, Clone)]
#[command(name = "logscope")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, global = true, default_value_t = Format::Text)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Analyze log rows for anomalies and diagnose incidents.
    Analyze(AnalyzeArgs),

    /// List the diagnosis rules.
    Rules {
        /// Rule table file (JSON) to show instead of the built-in rules.
        #[arg(short, long, env = "LOGSCOPE_RULES")]
        rules: Option<PathBuf>,
    },
}

/// Arguments for the analyze command.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Input file with rows as a JSON array or JSON lines; `-` reads stdin.
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Engine configuration file (JSON).
    #[arg(short, long, env = "LOGSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rule table file (JSON).
    #[arg(short, long, env = "LOGSCOPE_RULES")]
    pub rules: Option<PathBuf>,

    /// Window size in minutes; overrides the configuration file.
    #[arg(long, value_name = "N")]
    pub window_minutes: Option<u64>,

    /// Correlation window in minutes; overrides the configuration file.
    #[arg(long, value_name = "N")]
    pub correlation_minutes: Option<u64>,

    /// Run the async pipeline and print incidents as they close.
    #[arg(long)]
    pub streaming: bool,
}

impl AnalyzeArgs {
    /// True when rows come from stdin.
    #[must_use]
    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }
}
