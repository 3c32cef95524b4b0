//! CLI command for an interactive shell
//!
//! Implements `orc shell`.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::commands::environment::scoped_environment;
use crate::cli::commands::CommandContext;
use crate::core::workspace::WorkspaceOptions;
use crate::infra::script::ScriptInvocation;

const SHELL_BODY: &str = "exec \"${SHELL:-/bin/bash}\"";

/// Execute the shell command
pub async fn execute(context: &CommandContext, name: Option<&str>) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let env = scoped_environment(&ws, name)?;

    // Start where the scripts of the selected scope would run
    let working_dir = [env.get("BUILD_DIR"), env.get("SOURCE_DIR")]
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .find(|dir| dir.is_dir())
        .map_or_else(std::env::current_dir, Ok)?;

    let prelude = env.prelude();
    let code = ws
        .scripts()
        .run_attached(&ScriptInvocation {
            name: "shell",
            body: SHELL_BODY,
            working_dir: &working_dir,
            env: env.vars(),
            prelude: &prelude,
        })
        .context("Failed to start shell")?;

    if code != 0 {
        anyhow::bail!("Shell exited with code {code}");
    }
    Ok(())
}
