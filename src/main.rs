//! Orchestra CLI - meta build system
//!
//! Entry point for the `orc` command-line application.

use anyhow::Result;
use clap::Parser;

use orchestra::cli::output::display_error;
use orchestra::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Verbosity flags set the default level, RUST_LOG still wins
    cli.output().init_tracing();

    // Run the command and handle errors
    match cli.run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
