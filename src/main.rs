//! Convergent - desired-state convergence for remote APIs and local files
//!
//! This is the main entry point for the convergent CLI.

mod cli;

use anyhow::Result;
use cli::commands::validate::list_states;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use convergent::config::Config;
use convergent::logging::{init_logging, LogFormat};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when the configuration file cannot be used
const EXIT_CONFIG: i32 = 5;

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // An explicit config path must load; the implicit search falls back to defaults
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {:#}", e);
            Config::default()
        }
    };

    let format_name = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    let format = format_name.parse::<LogFormat>().unwrap_or_else(|e| {
        eprintln!("Warning: {}; using compact", e);
        LogFormat::Compact
    });
    init_logging(cli.verbosity(), &config.logging.level, format);

    if cli.verbosity() >= 2 {
        eprintln!("convergent v{}", VERSION);
    }
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "configuration loaded");
    }

    let mut ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Apply(args) => args.execute(&mut ctx),
        Commands::Check(args) => args.execute(&mut ctx),
        Commands::Validate(args) => args.execute(&mut ctx),
        Commands::States => list_states(&ctx),
    };

    match exit_code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
