//! CLI command for displaying the dependency graph
//!
//! Implements `orc graph`.

use anyhow::Result;

use crate::cli::commands::CommandContext;
use crate::core::graph::{self, GraphOptions};
use crate::core::workspace::WorkspaceOptions;

/// Execute the graph command
pub async fn execute(
    context: &CommandContext,
    name: Option<&str>,
    solved: bool,
    all_builds: bool,
) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let output = graph::render(&ws, name, GraphOptions { solved, all_builds })?;
    print!("{output}");
    Ok(())
}
