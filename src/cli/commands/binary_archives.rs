//! CLI commands for binary archive housekeeping
//!
//! Implements `orc binary-archives ls|clean|fix-symlinks`.

use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::commands::CommandContext;
use crate::core::archive_maintenance;
use crate::core::workspace::WorkspaceOptions;

/// List archives of every repository
pub async fn execute_ls(context: &CommandContext) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let listings = archive_maintenance::list(&ws).context("Failed to list binary archives")?;

    if context.output.json {
        let values: Vec<_> = listings
            .iter()
            .map(|l| {
                json!({
                    "repository": l.entry.repository,
                    "component": l.entry.component,
                    "build": l.entry.build,
                    "name": l.entry.name,
                    "current": l.current,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    let mut repository = None;
    for listing in &listings {
        if repository != Some(&listing.entry.repository) {
            println!("{}:", listing.entry.repository);
            repository = Some(&listing.entry.repository);
        }
        let marker = if listing.current { "*" } else { " " };
        println!("  {marker} {}", listing.entry.relative.display());
    }
    Ok(())
}

/// Delete unreferenced archives
pub async fn execute_clean(context: &CommandContext, pretend: bool) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let removed =
        archive_maintenance::clean(&ws, pretend).context("Failed to clean binary archives")?;

    if removed.is_empty() {
        context.output.success("Nothing to clean");
    }
    for path in &removed {
        if pretend {
            println!("Would remove {}", path.display());
        } else {
            context.output.success(&format!("Removed {}", path.display()));
        }
    }
    Ok(())
}

/// Recreate convenience symlinks
pub async fn execute_fix_symlinks(context: &CommandContext) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let links =
        archive_maintenance::fix_symlinks(&ws).context("Failed to recreate convenience symlinks")?;
    for link in &links {
        context.output.success(&format!("Linked {}", link.display()));
    }
    if links.is_empty() {
        context.output.success("No symlinks to create");
    }
    Ok(())
}
