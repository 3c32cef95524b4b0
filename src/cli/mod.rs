//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use commands::{CommandContext, Commands};
use output::OutputConfig;

/// Orchestra - meta build system
///
/// Installs a graph of interdependent components into a shared prefix,
/// from binary archives or by building them.
#[derive(Parser, Debug)]
#[command(name = "orc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Path of the .orchestra directory (searched upwards by default)
    #[arg(long, global = true, env = "ORCHESTRA_DOTDIR", value_name = "DIR")]
    pub orchestra_dotdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Output configuration from the global flags
    pub fn output(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.json, self.verbose)
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let context = CommandContext {
            dotdir: self.orchestra_dotdir.clone(),
            output: self.output(),
        };
        self.command.run(&context).await
    }
}
