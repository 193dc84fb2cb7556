//! CLI argument parsing for wattrace

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wattrace")]
#[command(version)]
#[command(about = "Per-method energy attribution from external power readings", long_about = None)]
pub struct Cli {
    /// Configuration file (falls back to ./wattrace.toml)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Measure the idle power baseline
    Calibrate,

    /// Take raw power readings at the sampling interval
    Sample {
        /// Number of readings
        #[arg(short = 'n', long = "count", value_name = "COUNT", default_value = "10")]
        count: u32,
    },

    /// Print the effective configuration as TOML
    Config,
}
