//! CLI module for convergent
//!
//! Argument parsing and subcommand dispatch for applying state files.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// convergent - desired-state convergence for remote APIs and local files
#[derive(Parser, Debug, Clone)]
#[command(name = "convergent")]
#[command(version)]
#[command(about = "Converge remote API resources and local files to a declared state", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "CONVERGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Log line format (pretty, compact, json); defaults to the config value
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// State returns as JSON for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Apply a state file
    Apply(commands::apply::ApplyArgs),

    /// Show what applying a state file would change (dry-run)
    Check(commands::check::CheckArgs),

    /// Check a state file without contacting any remote system
    Validate(commands::validate::ValidateArgs),

    /// List the available states
    States,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["convergent", "apply", "states.yml"]).unwrap();
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.file, PathBuf::from("states.yml"));
                assert!(!args.check);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity_and_output() {
        let cli = Cli::try_parse_from(["convergent", "-vvvv", "--output", "json", "check", "s.yml"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
        assert!(cli.is_json());
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from(["convergent", "apply", "s.yml", "--check", "--parallel"]).unwrap();
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.check);
        assert!(args.parallel);
    }

    #[test]
    fn test_states_command() {
        let cli = Cli::try_parse_from(["convergent", "--no-color", "states"]).unwrap();
        assert!(matches!(cli.command, Commands::States));
        assert!(cli.no_color);
    }
}
