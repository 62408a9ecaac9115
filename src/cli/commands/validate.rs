//! Validate and states commands
//!
//! Neither contacts a remote system.

use super::{CommandContext, EXIT_FAILED};
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

/// Arguments for validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// State file to validate
    pub file: PathBuf,
}

impl ValidateArgs {
    /// Check each declaration's state name, ensure value and params.
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let states = ctx.load_states(&self.file)?;
        let mut problems = Vec::new();
        for declaration in &states.states {
            if let Err(e) = ctx.registry.validate(declaration) {
                problems.push((declaration.id.clone(), e.to_string()));
            }
        }

        if ctx.output.is_json() {
            let errors: Vec<_> = problems.iter().map(|(id, e)| json!({"id": id, "error": e})).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"valid": problems.is_empty(), "states": states.len(), "errors": errors}))?
            );
        } else if problems.is_empty() {
            ctx.output.info(&format!("{}: {} states, all valid", self.file.display(), states.len()));
        } else {
            for (id, error) in &problems {
                ctx.output.error(&format!("{}: {}", id, error));
            }
        }
        Ok(if problems.is_empty() { 0 } else { EXIT_FAILED })
    }
}

/// List registered states with their descriptions and ensure values.
pub fn list_states(ctx: &CommandContext) -> Result<i32> {
    let rows: Vec<(String, String, Vec<String>)> = ctx
        .registry
        .names()
        .into_iter()
        .filter_map(|name| ctx.registry.get(name))
        .map(|handler| {
            let ensure = handler.supported().iter().map(ToString::to_string).collect();
            (handler.name().to_string(), handler.description().to_string(), ensure)
        })
        .collect();

    if ctx.output.is_json() {
        let list: Vec<_> = rows
            .iter()
            .map(|(name, description, ensure)| json!({"name": name, "description": description, "ensure": ensure}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        let table: Vec<(String, String)> = rows
            .into_iter()
            .map(|(name, description, ensure)| (name, format!("{} [{}]", description, ensure.join("|"))))
            .collect();
        ctx.output.table(&table);
    }
    Ok(0)
}
