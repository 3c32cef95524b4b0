//! Shell script execution
//!
//! Runs configure/install scripts (and a few orchestra-internal helpers)
//! through `bash` with strict flags, a given environment and working
//! directory.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::ScriptError;

/// Prologue prepended to every script
const STRICT_FLAGS: &str = "set -o errexit\nset -o nounset\nset -o pipefail\n";

/// How a script is run and reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// Orchestra-internal helper: output captured, logged with the script
    /// body on failure
    Internal,
    /// User-authored script: output streamed to the console when
    /// `stream_output` is set, otherwise captured and replayed on failure
    User { stream_output: bool },
}

/// A script to run
#[derive(Debug, Clone, Copy)]
pub struct ScriptInvocation<'a> {
    /// Human-readable name used in logs and errors
    pub name: &'a str,
    /// Script body
    pub body: &'a str,
    /// Working directory
    pub working_dir: &'a Path,
    /// Environment variables set on the shell process
    pub env: &'a BTreeMap<String, String>,
    /// Shell code executed before the body (exports/unsets)
    pub prelude: &'a str,
}

/// Shell script runner
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner {
    /// Create a runner using `bash`
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }

    /// Full script text as handed to the shell
    pub fn render(invocation: &ScriptInvocation<'_>) -> String {
        let mut script = String::from(STRICT_FLAGS);
        script.push_str(invocation.prelude);
        if !invocation.prelude.is_empty() && !invocation.prelude.ends_with('\n') {
            script.push('\n');
        }
        script.push_str(invocation.body);
        script.push('\n');
        script
    }

    /// Run a script attached to the terminal and return its exit code
    pub fn run_attached(&self, invocation: &ScriptInvocation<'_>) -> Result<i32, ScriptError> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(Self::render(invocation))
            .current_dir(invocation.working_dir)
            .envs(invocation.env)
            .status()
            .map_err(|source| ScriptError::Spawn {
                name: invocation.name.to_string(),
                source,
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Run a script and return its exit code.
    ///
    /// When `check` is set a non-zero exit is turned into a [`ScriptError`].
    pub fn run(
        &self,
        invocation: &ScriptInvocation<'_>,
        flavor: ScriptFlavor,
        check: bool,
    ) -> Result<i32, ScriptError> {
        let script = Self::render(invocation);
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&script)
            .current_dir(invocation.working_dir)
            .envs(invocation.env)
            .stdin(Stdio::null());

        tracing::debug!(
            "Running script '{}' in {}",
            invocation.name,
            invocation.working_dir.display()
        );

        let spawn_error = |source| ScriptError::Spawn {
            name: invocation.name.to_string(),
            source,
        };

        let (code, captured) = match flavor {
            ScriptFlavor::User {
                stream_output: true,
            } => {
                let status = cmd.status().map_err(spawn_error)?;
                (status.code().unwrap_or(-1), None)
            }
            ScriptFlavor::Internal | ScriptFlavor::User { .. } => {
                let output = cmd.output().map_err(spawn_error)?;
                let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
                captured.push_str(&String::from_utf8_lossy(&output.stderr));
                (output.status.code().unwrap_or(-1), Some(captured))
            }
        };

        if code == 0 || !check {
            return Ok(code);
        }

        match flavor {
            ScriptFlavor::Internal => {
                let output = captured.unwrap_or_default();
                tracing::error!(
                    "Internal script '{}' failed with code {code}\n--- script ---\n{}\n--- output ---\n{}",
                    invocation.name,
                    invocation.body,
                    output
                );
                Err(ScriptError::InternalScriptFailed {
                    name: invocation.name.to_string(),
                    code,
                    output,
                })
            }
            ScriptFlavor::User { .. } => {
                if let Some(output) = captured {
                    let mut stderr = std::io::stderr().lock();
                    let _ = stderr.write_all(output.as_bytes());
                }
                Err(ScriptError::UserScriptFailed {
                    name: invocation.name.to_string(),
                    code,
                })
            }
        }
    }
}
