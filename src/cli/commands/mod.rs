//! Subcommands module for convergent CLI

pub mod apply;
pub mod check;
pub mod validate;

use crate::cli::output::OutputFormatter;
use anyhow::{Context, Result};
use convergent::config::Config;
use convergent::engine::ConvergenceEngine;
use convergent::states::{StateContext, StateFile, StateRegistry};
use convergent::transport::HttpTransport;
use std::path::Path;
use std::sync::Arc;

/// Exit code when any state failed
pub const EXIT_FAILED: i32 = 2;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// State handlers
    pub registry: StateRegistry,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            output: OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity()),
            config,
            registry: StateRegistry::with_builtins(),
            verbosity: cli.verbosity(),
        }
    }

    pub fn load_states(&self, path: &Path) -> Result<StateFile> {
        StateFile::load(path).with_context(|| format!("Failed to load state file: {}", path.display()))
    }

    /// Engine, HTTP transport and configuration for one run.
    pub fn state_context(&self, check_mode: bool) -> Result<StateContext> {
        let transport = HttpTransport::new(self.config.defaults.timeout(), self.config.defaults.validate_certs)
            .context("Failed to create HTTP transport")?;
        let engine = ConvergenceEngine::new().with_dry_run(check_mode || self.config.defaults.check_mode);
        Ok(StateContext::new(engine, Arc::new(transport), self.config.clone()))
    }

    /// Size the rayon pool once, if configured.
    pub fn configure_parallelism(&self) {
        let threads = self.config.defaults.parallelism;
        if threads > 0 {
            if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
                tracing::debug!(error = %e, "rayon pool already configured");
            }
        }
    }
}
