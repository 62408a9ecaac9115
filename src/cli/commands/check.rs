//! Check command - Dry-run mode

use super::CommandContext;
use crate::cli::commands::apply::ApplyArgs;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the check command
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Path to the state file
    #[arg(required = true)]
    pub file: PathBuf,

    /// Run declarations concurrently
    #[arg(long)]
    pub parallel: bool,
}

impl CheckArgs {
    /// Execute the check command
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let apply = ApplyArgs {
            file: self.file.clone(),
            check: true,
            parallel: self.parallel,
        };
        apply.execute(ctx)
    }
}
