//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod binary_archives;
pub mod clean;
pub mod clone;
pub mod components;
pub mod configure;
pub mod environment;
pub mod graph;
pub mod install;
pub mod shell;
pub mod uninstall;
pub mod update;
pub mod upgrade;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::output::OutputConfig;
use crate::core::action::ActionId;
use crate::core::configuration::find_dotdir;
use crate::core::executor::{ExecutionReport, ExecutorOptions};
use crate::core::solver::SolverOptions;
use crate::core::workspace::{ArchiveMode, Workspace, WorkspaceOptions};

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the configured components
    Components {
        /// Component to show (all if not specified)
        name: Option<String>,

        /// Only installed components
        #[arg(long, conflicts_with = "not_installed")]
        installed: bool,

        /// Only components that are not installed
        #[arg(long)]
        not_installed: bool,

        /// Show the dependencies of every build
        #[arg(long)]
        deps: bool,

        /// Show recursive hashes
        #[arg(long)]
        hashes: bool,
    },

    /// Print the script environment as shell exports
    Environment {
        /// Component or component@build (global environment if not specified)
        name: Option<String>,
    },

    /// Clone the sources of a component
    Clone {
        /// Component name
        name: String,
    },

    /// Configure a build
    Configure {
        /// Component or component@build
        name: String,

        #[command(flatten)]
        archives: ArchiveArgs,

        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Install a build and its dependencies
    Install {
        /// Component or component@build
        name: String,

        #[command(flatten)]
        archives: ArchiveArgs,

        #[command(flatten)]
        plan: PlanArgs,

        /// Stage the install but leave the orchestra root untouched
        #[arg(long)]
        no_merge: bool,

        /// Keep the temporary root after installing
        #[arg(long)]
        keep_tmproot: bool,

        /// Run test suites (sets RUN_TESTS=1)
        #[arg(long)]
        test: bool,

        /// Create binary archives of builds made from source
        #[arg(long)]
        create_binary_archives: bool,
    },

    /// Remove an installed component from the orchestra root
    Uninstall {
        /// Component name
        name: String,
    },

    /// Remove build directories of a component
    Clean {
        /// Component name
        name: String,

        /// Also remove the source directory
        #[arg(long)]
        include_sources: bool,

        /// Only print what would be removed
        #[arg(long)]
        pretend: bool,
    },

    /// Pull the configuration, binary archives and sources, refresh remote heads
    Update {
        /// Do not pull the configuration repository
        #[arg(long)]
        no_config: bool,
    },

    /// Reinstall manually installed components whose hash changed
    Upgrade {
        #[command(flatten)]
        archives: ArchiveArgs,

        /// Run test suites (sets RUN_TESTS=1)
        #[arg(long)]
        test: bool,

        /// Only print the actions that would run
        #[arg(long)]
        pretend: bool,
    },

    /// Print the dependency graph in DOT format
    Graph {
        /// Component or component@build (every component if not specified)
        name: Option<String>,

        /// Print the solved graph instead of the expanded one
        #[arg(long)]
        solved: bool,

        /// Root the graph at every build, not only default builds
        #[arg(long)]
        all_builds: bool,
    },

    /// Open a shell with the environment of a component or build
    Shell {
        /// Component or component@build (global environment if not specified)
        name: Option<String>,
    },

    /// Manage binary archives
    BinaryArchives {
        #[command(subcommand)]
        command: BinaryArchivesCommands,
    },
}

/// Binary archives subcommands
#[derive(Subcommand, Debug)]
pub enum BinaryArchivesCommands {
    /// List archives of every repository
    Ls,

    /// Delete archives neither current nor linked by a convenience symlink
    Clean {
        /// Only print what would be removed
        #[arg(long)]
        pretend: bool,
    },

    /// Recreate convenience symlinks of installed components
    FixSymlinks,
}

/// Where installs get their files from
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct ArchiveArgs {
    /// Build from source when no binary archive is available
    #[arg(short = 'b', long, conflicts_with = "force_build")]
    pub fallback_build: bool,

    /// Always build from source
    #[arg(short = 'B', long)]
    pub force_build: bool,
}

impl ArchiveArgs {
    pub fn mode(&self) -> ArchiveMode {
        if self.force_build {
            ArchiveMode::ForceBuild
        } else if self.fallback_build {
            ArchiveMode::FallbackToBuild
        } else {
            ArchiveMode::ArchivesOnly
        }
    }
}

/// Planning flags shared by configure and install
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct PlanArgs {
    /// Run only the requested action, not its dependencies
    #[arg(long, conflicts_with = "no_force")]
    pub no_deps: bool,

    /// Skip the requested action when it is already satisfied
    #[arg(long)]
    pub no_force: bool,

    /// Only print the actions that would run
    #[arg(long)]
    pub pretend: bool,
}

impl PlanArgs {
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            force_roots: !self.no_force,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            pretend: self.pretend,
            no_deps: self.no_deps,
        }
    }
}

/// State shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Explicit dotdir from the command line or environment
    pub dotdir: Option<PathBuf>,
    pub output: OutputConfig,
}

impl CommandContext {
    /// Locate the `.orchestra` directory
    pub fn dotdir(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Ok(find_dotdir(self.dotdir.as_deref(), &current_dir)?)
    }

    /// Load the workspace with the given options
    pub fn workspace(&self, options: WorkspaceOptions) -> Result<Workspace> {
        let dotdir = self.dotdir()?;
        let workspace = Workspace::open(&dotdir)
            .with_context(|| format!("Failed to load configuration from {}", dotdir.display()))?;
        Ok(workspace.with_options(WorkspaceOptions {
            stream_output: self.output.stream_output(),
            ..options
        }))
    }
}

/// Solve and execute `roots`, then print what ran
pub fn run_plan(
    context: &CommandContext,
    ws: &mut Workspace,
    roots: &[ActionId],
    solver_options: SolverOptions,
    executor_options: ExecutorOptions,
    description: &str,
) -> Result<ExecutionReport> {
    let spinner = if executor_options.pretend {
        None
    } else {
        context.output.spinner(description)
    };
    let result = ws.run_roots(roots, solver_options, executor_options);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result.with_context(|| format!("{description} failed"))?;
    print_report(&context.output, &report);
    Ok(report)
}

/// Print an execution report
pub fn print_report(output: &OutputConfig, report: &ExecutionReport) {
    if output.json {
        let value = json!({
            "pretend": report.pretend,
            "actions": report.actions,
        });
        println!("{value:#}");
        return;
    }
    if output.quiet {
        return;
    }
    if report.pretend {
        if report.actions.is_empty() {
            println!("Nothing to do");
        } else {
            println!("Would run:");
            for action in &report.actions {
                println!("  {action}");
            }
        }
        return;
    }
    if report.actions.is_empty() {
        output.success("Nothing to do");
    } else {
        for action in &report.actions {
            output.success(action);
        }
    }
}

impl Commands {
    /// Execute the command
    pub async fn run(self, context: &CommandContext) -> Result<()> {
        match self {
            Self::Components {
                name,
                installed,
                not_installed,
                deps,
                hashes,
            } => {
                let options = components::ListOptions {
                    name,
                    installed,
                    not_installed,
                    deps,
                    hashes,
                };
                components::execute(context, options).await
            }
            Self::Environment { name } => environment::execute(context, name.as_deref()).await,
            Self::Clone { name } => clone::execute(context, &name).await,
            Self::Configure {
                name,
                archives,
                plan,
            } => configure::execute(context, &name, archives, plan).await,
            Self::Install {
                name,
                archives,
                plan,
                no_merge,
                keep_tmproot,
                test,
                create_binary_archives,
            } => {
                let options = install::InstallOptions {
                    archives,
                    plan,
                    no_merge,
                    keep_tmproot,
                    test,
                    create_binary_archives,
                };
                install::execute(context, &name, options).await
            }
            Self::Uninstall { name } => uninstall::execute(context, &name).await,
            Self::Clean {
                name,
                include_sources,
                pretend,
            } => clean::execute(context, &name, include_sources, pretend).await,
            Self::Update { no_config } => update::execute(context, !no_config).await,
            Self::Upgrade {
                archives,
                test,
                pretend,
            } => upgrade::execute(context, archives, test, pretend).await,
            Self::Graph {
                name,
                solved,
                all_builds,
            } => graph::execute(context, name.as_deref(), solved, all_builds).await,
            Self::Shell { name } => shell::execute(context, name.as_deref()).await,
            Self::BinaryArchives { command } => match command {
                BinaryArchivesCommands::Ls => binary_archives::execute_ls(context).await,
                BinaryArchivesCommands::Clean { pretend } => {
                    binary_archives::execute_clean(context, pretend).await
                }
                BinaryArchivesCommands::FixSymlinks => {
                    binary_archives::execute_fix_symlinks(context).await
                }
            },
        }
    }
}
