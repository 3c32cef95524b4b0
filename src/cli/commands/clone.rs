//! CLI command for cloning component sources
//!
//! Implements `orc clone`.

use anyhow::Result;

use crate::cli::commands::{run_plan, CommandContext};
use crate::core::executor::ExecutorOptions;
use crate::core::solver::SolverOptions;
use crate::core::workspace::WorkspaceOptions;

/// Execute the clone command
pub async fn execute(context: &CommandContext, name: &str) -> Result<()> {
    let mut ws = context.workspace(WorkspaceOptions::default())?;
    let root = ws.clone_root(name)?;
    run_plan(
        context,
        &mut ws,
        &[root],
        SolverOptions { force_roots: false },
        ExecutorOptions::default(),
        &format!("Cloning {name}"),
    )?;
    Ok(())
}
