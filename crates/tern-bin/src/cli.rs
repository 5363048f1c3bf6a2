// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `sas generate`: sign a token from a connection string
//! - `sas inspect`: decode a token
//! - `validate`: validate a configuration file
//! - `backoff`: print the retry delay schedule
//! - `version`: show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// tern - hub device client tooling
#[derive(Parser, Debug)]
#[command(
    name = "tern",
    author = "Sylvex <contact@sylvex.io>",
    version = tern_core::VERSION,
    about = "Hub device client tooling",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "tern.toml", env = "TERN_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "TERN_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "TERN_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands for the tern CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Generate or inspect shared access signatures
    #[command(subcommand)]
    Sas(SasCommand),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Print the delays the configured retry policy would use
    Backoff(BackoffArgs),

    /// Show detailed version information
    Version,
}

/// `sas` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SasCommand {
    /// Sign a token with the key from a connection string
    Generate(SasGenerateArgs),

    /// Decode a token and show its fields
    Inspect(SasInspectArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for `sas generate`.
#[derive(Args, Debug, Clone)]
pub struct SasGenerateArgs {
    /// Connection string carrying a SharedAccessKey (default: from config)
    #[arg(long, env = "TERN_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, default_value = "3600")]
    pub ttl: u64,
}

/// Arguments for `sas inspect`.
#[derive(Args, Debug, Clone)]
pub struct SasInspectArgs {
    /// Token, with or without the `SharedAccessSignature` prefix
    pub token: String,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `backoff` command.
#[derive(Args, Debug, Clone)]
pub struct BackoffArgs {
    /// Number of attempts to show
    #[arg(short, long, default_value = "8")]
    pub attempts: u32,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}


/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sas_generate_command() {
        let cli = Cli::parse_from([
            "tern",
            "sas",
            "generate",
            "--connection-string",
            "HostName=h;DeviceId=d;SharedAccessKey=a2V5",
            "--ttl",
            "600",
        ]);
        match cli.command {
            Commands::Sas(SasCommand::Generate(args)) => {
                assert_eq!(args.ttl, 600);
                assert!(args.connection_string.is_some());
            }
            other => panic!("Expected sas generate, got {:?}", other),
        }
    }

    #[test]
    fn test_sas_inspect_command() {
        let cli = Cli::parse_from(["tern", "sas", "inspect", "sr=a&sig=b&se=1", "-f", "json"]);
        match cli.command {
            Commands::Sas(SasCommand::Inspect(args)) => {
                assert_eq!(args.token, "sr=a&sig=b&se=1");
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("Expected sas inspect, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["tern", "-c", "/etc/tern/client.yaml", "validate", "--show-config"]);
        assert_eq!(cli.config, PathBuf::from("/etc/tern/client.yaml"));
        match cli.command {
            Commands::Validate(args) => assert!(args.show_config),
            other => panic!("Expected validate, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_defaults() {
        let cli = Cli::parse_from(["tern", "backoff"]);
        match cli.command {
            Commands::Backoff(args) => assert_eq!(args.attempts, 8),
            other => panic!("Expected backoff, got {:?}", other),
        }
    }

    #[test]
    fn test_quiet_and_verbose() {
        let cli = Cli::parse_from(["tern", "-q", "version"]);
        assert_eq!(cli.effective_log_level(), "warn");

        let cli = Cli::parse_from(["tern", "-v", "version"]);
        assert_eq!(cli.effective_log_level(), "debug");
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["tern"]).is_err());
    }
}
