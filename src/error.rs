//! Error types for orchestra
//!
//! Domain-specific error types using thiserror. Every error knows whether
//! it is actionable by the user or points at an orchestra bug / corrupted
//! environment, see [`OrchestraError::is_user_error`].

use std::path::PathBuf;
use thiserror::Error;

use crate::core::version::VersionError;
use crate::infra::git::GitError;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No `.orchestra` directory could be found
    #[error("Could not find an .orchestra directory in '{start}' or any of its parents")]
    DotdirNotFound { start: PathBuf },

    /// IO error while reading the configuration
    #[error("IO error for '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The templating front-end failed
    #[error("Failed to expand configuration templates: {message}")]
    Template { message: String },

    /// The expanded document is not valid YAML
    #[error("Failed to parse expanded configuration")]
    Parse {
        #[source]
        source: serde_yaml::Error,
    },

    /// The expanded document does not match the schema
    #[error("Configuration does not match the schema: {message}")]
    Schema { message: String },

    /// The configuration cache could not be (de)serialized
    #[error("Invalid configuration cache '{path}'")]
    Cache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A dependency refers to a component that does not exist
    #[error("Unknown component '{name}' referenced by '{referenced_by}'")]
    UnknownComponent { name: String, referenced_by: String },

    /// A dependency or command refers to a build that does not exist
    #[error("Component '{component}' has no build named '{build}'")]
    UnknownBuild { component: String, build: String },

    /// The default build is not one of the component builds
    #[error("Default build '{build}' of component '{component}' is not defined")]
    UnknownDefaultBuild { component: String, build: String },

    /// A component without builds
    #[error("Component '{component}' does not define any build")]
    NoBuilds { component: String },

    /// A dependency string that cannot be parsed
    #[error("Invalid dependency specification '{spec}'")]
    InvalidDependency { spec: String },

    /// A component names a binary archives repository that is not configured
    #[error("Component '{component}' uses unknown binary archives repository '{name}'")]
    UnknownBinaryArchives { component: String, name: String },

    /// `-NAME` entries in the environment list must have an empty value
    #[error("Environment entry '-{name}' requests an unset but has value '{value}'")]
    InvalidUnset { name: String, value: String },

    /// Configuration requires a newer orchestra
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Script execution errors
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The shell could not be spawned
    #[error("Failed to spawn shell for '{name}'")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A user-authored configure/install script failed
    #[error("Script '{name}' exited with code {code}")]
    UserScriptFailed { name: String, code: i32 },

    /// An orchestra-internal script failed
    #[error("Internal script '{name}' exited with code {code}: {output}")]
    InternalScriptFailed {
        name: String,
        code: i32,
        output: String,
    },
}

/// Dependency-graph solver errors
#[derive(Error, Debug, PartialEq)]
pub enum SolverError {
    /// An `AnyOf` choice has no alternative that keeps the graph acyclic
    #[error("Unsatisfiable choice between: {}", nodes.join(", "))]
    UnsatisfiableChoice { nodes: Vec<String> },

    /// A dependency cycle remains over actions that still have to run
    #[error("Circular dependency detected: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },
}

/// Executor errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// An action failed while running
    #[error("Action '{action}' failed")]
    ActionFailed {
        action: String,
        #[source]
        source: Box<OrchestraError>,
    },

    /// No action can make progress but some are still pending
    #[error("Scheduling halted with pending actions: {}", pending.join(", "))]
    SchedulingHalt { pending: Vec<String> },

    /// An action completed but did not reach its satisfied state
    #[error("Action '{action}' completed but is still not satisfied")]
    NotSatisfied { action: String },
}

/// Install pipeline errors
#[derive(Error, Debug)]
pub enum InstallError {
    /// Neither a binary archive nor building from source is allowed/available
    #[error("No source available to install '{build}'")]
    NoSourceAvailable { build: String },

    /// The binary archive for this build does not exist
    #[error("Binary archive '{archive}' for '{build}' not found{}", diff.as_ref().map(|d| format!("\nHash material diff against closest archive:\n{d}")).unwrap_or_default())]
    MissingBinaryArchive {
        build: String,
        archive: String,
        diff: Option<String>,
    },

    /// A replacement would grow the ELF string table
    #[error("RPATH replacement in '{path}' would grow '{original}' to '{replacement}'")]
    RpathTooLong {
        path: PathBuf,
        original: String,
        replacement: String,
    },

    /// Malformed ELF file
    #[error("Malformed ELF file '{path}': {reason}")]
    MalformedElf { path: PathBuf, reason: String },

    /// The declared license file is missing
    #[error("License file '{path}' declared by '{component}' does not exist")]
    LicenseMissing { component: String, path: PathBuf },

    /// Invariant violation after configure
    #[error("Build directory '{path}' disappeared after configure")]
    ConfigureSentinelParentMissing { path: PathBuf },

    /// Archive creation or extraction failed
    #[error("Archive error for '{path}'")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error for '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Install metadata errors
#[derive(Error, Debug)]
pub enum MetadataError {
    /// IO error
    #[error("IO error for '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata JSON is malformed
    #[error("Malformed metadata '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Component is not installed
    #[error("Component '{component}' is not installed")]
    NotInstalled { component: String },
}

/// Top-level orchestra error type
#[derive(Error, Debug)]
pub enum OrchestraError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Script error
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Solver error
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// Executor error
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Install error
    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    /// Metadata error
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// IO error
    #[error("IO error for '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl OrchestraError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is actionable by the user (as opposed to an
    /// orchestra bug or a corrupted environment)
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::Config(_) | Self::Solver(_) => true,
            Self::Script(e) => matches!(e, ScriptError::UserScriptFailed { .. }),
            Self::Install(e) => matches!(
                e,
                InstallError::NoSourceAvailable { .. }
                    | InstallError::MissingBinaryArchive { .. }
                    | InstallError::LicenseMissing { .. }
                    | InstallError::RpathTooLong { .. }
            ),
            Self::Metadata(e) => matches!(e, MetadataError::NotInstalled { .. }),
            Self::Git(e) => matches!(
                e,
                GitError::NotInstalled { .. }
                    | GitError::FastForwardRefused { .. }
                    | GitError::LfsFileMissing { .. }
            ),
            Self::Executor(e) => match e {
                ExecutorError::ActionFailed { source, .. } => source.is_user_error(),
                ExecutorError::SchedulingHalt { .. } | ExecutorError::NotSatisfied { .. } => false,
            },
            Self::Io { .. } | Self::Generic(_) => false,
        }
    }
}

/// Result alias used across the core
pub type Result<T, E = OrchestraError> = std::result::Result<T, E>;
