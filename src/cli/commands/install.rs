//! CLI command for installing a build
//!
//! Implements `orc install`.

use anyhow::Result;

use crate::cli::commands::{run_plan, ArchiveArgs, CommandContext, PlanArgs};
use crate::core::workspace::WorkspaceOptions;

/// Flags of `orc install`
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub archives: ArchiveArgs,
    pub plan: PlanArgs,
    pub no_merge: bool,
    pub keep_tmproot: bool,
    pub test: bool,
    pub create_binary_archives: bool,
}

/// Execute the install command
pub async fn execute(context: &CommandContext, name: &str, options: InstallOptions) -> Result<()> {
    let mut ws = context.workspace(WorkspaceOptions {
        archive_mode: options.archives.mode(),
        no_merge: options.no_merge,
        keep_tmproot: options.keep_tmproot,
        run_tests: options.test,
        create_binary_archives: options.create_binary_archives,
        ..WorkspaceOptions::default()
    })?;

    let component = ws.config.resolve_build(name)?.component.clone();
    ws.request([component]);
    let root = ws.install_root(name)?;

    run_plan(
        context,
        &mut ws,
        &[root],
        options.plan.solver_options(),
        options.plan.executor_options(),
        &format!("Installing {name}"),
    )?;
    Ok(())
}
