//! CLI command for upgrading installed components
//!
//! Implements `orc upgrade`.

use anyhow::{Context, Result};

use crate::cli::commands::{print_report, ArchiveArgs, CommandContext};
use crate::core::executor::ExecutorOptions;
use crate::core::upgrade::upgrade;
use crate::core::workspace::WorkspaceOptions;

/// Execute the upgrade command
pub async fn execute(
    context: &CommandContext,
    archives: ArchiveArgs,
    test: bool,
    pretend: bool,
) -> Result<()> {
    let mut ws = context.workspace(WorkspaceOptions {
        archive_mode: archives.mode(),
        run_tests: test,
        ..WorkspaceOptions::default()
    })?;

    let options = ExecutorOptions {
        pretend,
        no_deps: false,
    };
    let spinner = if pretend {
        None
    } else {
        context.output.spinner("Upgrading...")
    };
    let result = upgrade(&mut ws, options);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result.context("Upgrade failed")?;
    print_report(&context.output, &report);
    Ok(())
}
