//! CLI command for removing build directories
//!
//! Implements `orc clean`.

use anyhow::{Context, Result};

use crate::cli::commands::CommandContext;
use crate::core::clean::{clean_component, CleanOptions};
use crate::core::workspace::WorkspaceOptions;

/// Execute the clean command
pub async fn execute(
    context: &CommandContext,
    name: &str,
    include_sources: bool,
    pretend: bool,
) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let options = CleanOptions {
        include_sources,
        pretend,
    };
    let result = clean_component(&ws.config, name, options)
        .with_context(|| format!("Failed to clean {name}"))?;

    if result.removed.is_empty() {
        context.output.success("Nothing to clean");
        return Ok(());
    }
    for dir in &result.removed {
        if pretend {
            println!("Would remove {}", dir.display());
        } else {
            context.output.success(&format!("Removed {}", dir.display()));
        }
    }
    Ok(())
}
