//! CLI command for uninstalling a component
//!
//! Implements `orc uninstall`.

use anyhow::{Context, Result};

use crate::cli::commands::CommandContext;
use crate::core::uninstall::uninstall;
use crate::core::workspace::WorkspaceOptions;

/// Execute the uninstall command
pub async fn execute(context: &CommandContext, name: &str) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    if !ws.metadata.is_installed(name) {
        anyhow::bail!("Component '{name}' is not installed");
    }

    let report = uninstall(&ws.config.paths.root, &ws.metadata, name)
        .with_context(|| format!("Failed to uninstall {name}"))?;
    context.output.success(&format!(
        "Uninstalled {name} ({} files, {} directories)",
        report.removed_files, report.removed_dirs
    ));
    Ok(())
}
