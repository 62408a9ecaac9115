//! Apply command
//!
//! Runs every declaration of a state file through its handler.

use super::{CommandContext, EXIT_FAILED};
use anyhow::Result;
use clap::Parser;
use convergent::outcome::OutcomeSummary;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the apply command
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Path to the state file
    #[arg(required = true)]
    pub file: PathBuf,

    /// Run in check mode (dry-run, don't make changes)
    #[arg(long = "check")]
    pub check: bool,

    /// Run declarations concurrently
    #[arg(long)]
    pub parallel: bool,
}

impl ApplyArgs {
    /// Execute the apply command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let states = ctx.load_states(&self.file)?;
        let state_ctx = ctx.state_context(self.check)?;
        if self.parallel {
            ctx.configure_parallelism();
        }

        let title = if state_ctx.engine.is_dry_run() { "CHECK" } else { "APPLY" };
        ctx.output.banner(&format!("{} {}", title, self.file.display()));

        let records = ctx.registry.run_all(&states, &state_ctx, self.parallel);
        ctx.output.report(&records)?;

        let summary = OutcomeSummary::from_records(&records);
        info!(ok = summary.ok, changed = summary.changed, pending = summary.pending, failed = summary.failed, "run finished");
        Ok(if summary.has_failures() { EXIT_FAILED } else { 0 })
    }
}
