//! CLI command for updating repositories
//!
//! Implements `orc update`.

use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::commands::CommandContext;
use crate::cli::output::status;
use crate::core::update::{update, UpdateOptions};
use crate::core::workspace::WorkspaceOptions;

/// Execute the update command
pub async fn execute(context: &CommandContext, pull_config: bool) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;

    let spinner = context.output.spinner("Updating repositories...");
    let result = update(&ws, UpdateOptions { pull_config }).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let result = result.context("Update failed")?;

    if context.output.json {
        let failures: Vec<_> = result
            .failures
            .iter()
            .map(|f| json!({"target": f.target, "reason": f.reason}))
            .collect();
        let value = json!({
            "config_pulled": result.config_pulled,
            "binary_archives": result.archive_repositories,
            "refreshed": result.refreshed,
            "unknown": result.unknown,
            "pulled": result.pulled,
            "failures": failures,
        });
        println!("{value:#}");
    } else {
        if result.config_pulled {
            context.output.success("Pulled configuration");
        }
        for repository in &result.archive_repositories {
            context
                .output
                .success(&format!("Updated binary archives '{repository}'"));
        }
        context.output.success(&format!(
            "Refreshed remote heads of {} components",
            result.refreshed.len()
        ));
        for component in &result.unknown {
            context
                .output
                .warning(&format!("Could not determine remote heads of {component}"));
        }
        for component in &result.pulled {
            context.output.success(&format!("Pulled {component}"));
        }
        for failure in &result.failures {
            eprintln!("{} {}: {}", status::ERROR, failure.target, failure.reason);
        }
    }

    if !result.is_success() {
        anyhow::bail!("{} repositories failed to update", result.failures.len());
    }
    Ok(())
}
