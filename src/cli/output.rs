//! Output formatting and progress indicators
//!
//! Verbosity handling, the tracing subscriber, spinners and the status
//! prefixes used by every command.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Output preferences from the global flags
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    pub quiet: bool,
    pub json: bool,
    pub verbose: u8,
}

impl OutputConfig {
    pub fn new(quiet: bool, json: bool, verbose: u8) -> Self {
        Self {
            quiet,
            json,
            verbose,
        }
    }

    /// Default log level: `-q` error, none warn, `-v` info, `-vv` debug
    pub fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::ERROR,
            (false, 0) => Level::WARN,
            (false, 1) => Level::INFO,
            (false, _) => Level::DEBUG,
        }
    }

    /// Install the global tracing subscriber. `RUST_LOG` takes precedence.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(self.log_level().into())
            .from_env_lossy();
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Whether spinners may be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.json && self.verbose == 0
    }

    /// Whether user scripts print straight to the console
    pub fn stream_output(&self) -> bool {
        self.verbose > 0
    }

    /// Spinner for a long-running step, when progress is shown
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        self.show_progress().then(|| create_spinner(message))
    }

    /// Print a success line unless quiet or in JSON mode
    pub fn success(&self, message: &str) {
        if !self.quiet && !self.json {
            println!("{} {message}", status::SUCCESS);
        }
    }

    /// Print a warning line unless quiet
    pub fn warning(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {message}", status::WARNING);
        }
    }
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Print an error and its cause chain to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";
}
