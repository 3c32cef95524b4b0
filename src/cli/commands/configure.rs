//! CLI command for configuring a build
//!
//! Implements `orc configure`.

use anyhow::Result;

use crate::cli::commands::{run_plan, ArchiveArgs, CommandContext, PlanArgs};
use crate::core::workspace::WorkspaceOptions;

/// Execute the configure command
pub async fn execute(
    context: &CommandContext,
    name: &str,
    archives: ArchiveArgs,
    plan: PlanArgs,
) -> Result<()> {
    let mut ws = context.workspace(WorkspaceOptions {
        archive_mode: archives.mode(),
        ..WorkspaceOptions::default()
    })?;
    let root = ws.configure_root(name)?;
    run_plan(
        context,
        &mut ws,
        &[root],
        plan.solver_options(),
        plan.executor_options(),
        &format!("Configuring {name}"),
    )?;
    Ok(())
}
