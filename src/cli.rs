// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `warden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "warden",
    version,
    about = "Supervise a native daemon, or update the package that ships it.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Warden.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Warden.toml")]
    pub config: String,

    /// Start payload (e.g. `warden://run?version=2.0`).
    ///
    /// When omitted this is a bare restart and the last persisted payload is
    /// used instead.
    #[arg(long, value_name = "URI")]
    pub payload: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WARDEN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load + validate config, print what a start request would do, and exit.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
