//! # logscope-cli
//!
//! Command-line front end for the logscope engine.
//!
//! Reads rows already decoded as JSON (an array or JSON lines) from a file or
//! stdin, runs the detection and diagnosis pipeline, and prints anomalies,
//! diagnoses and health as text or JSON.

pub mod cli;
pub mod commands;
pub mod input;
pub mod output;

pub use cli::{AnalyzeArgs, Cli, Commands, Format};
pub use output::OutputFormat;
