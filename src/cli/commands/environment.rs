//! CLI command for printing the script environment
//!
//! Implements `orc environment`.

use anyhow::Result;

use crate::cli::commands::CommandContext;
use crate::core::environment::ScriptEnvironment;
use crate::core::workspace::{Workspace, WorkspaceOptions};

/// Environment of `name`: a component, a `component@build`, or the global
/// environment when no name is given
pub fn scoped_environment(ws: &Workspace, name: Option<&str>) -> Result<ScriptEnvironment> {
    let Some(name) = name else {
        return Ok(ScriptEnvironment::global(&ws.config));
    };
    if name.contains('@') {
        let build = ws.config.resolve_build(name)?;
        let component = ws.config.component(&build.component)?;
        return Ok(ScriptEnvironment::for_build(&ws.config, component, build));
    }
    let component = ws.config.component(name)?;
    Ok(ScriptEnvironment::for_component(&ws.config, component))
}

/// Execute the environment command
pub async fn execute(context: &CommandContext, name: Option<&str>) -> Result<()> {
    let ws = context.workspace(WorkspaceOptions::default())?;
    let env = scoped_environment(&ws, name)?;
    print!("{}", env.export_script());
    Ok(())
}
