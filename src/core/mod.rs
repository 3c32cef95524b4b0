//! Core business logic module
//!
//! The configuration model, hashing, the solver and executor, and the
//! install/uninstall/update machinery. External programs are only reached
//! through [`crate::infra`].
//!
//! # Submodules
//!
//! - [`schema`] / [`loader`] / [`configuration`] - Configuration loading and validation
//! - [`component`] / [`dependency`] / [`action`] - Components, builds and the action arena
//! - [`hashing`] / [`remote_heads`] - Recursive hashes and commit identity
//! - [`solver`] / [`executor`] - Dependency solving and scheduling
//! - [`workspace`] - Per-invocation context tying it all together
//! - [`install`] / [`post_install`] / [`elf`] - Install pipeline
//! - [`binary_archives`] / [`archive_maintenance`] - Binary archive repositories
//! - [`metadata`] / [`uninstall`] - Install records and removal
//! - [`update`] / [`upgrade`] / [`clean`] - Maintenance commands
//! - [`environment`] - Script environment
//! - [`graph`] - Graphviz export

pub mod action;
pub mod archive_maintenance;
pub mod binary_archives;
pub mod clean;
pub mod component;
pub mod configuration;
pub mod dependency;
pub mod elf;
pub mod environment;
pub mod executor;
pub mod graph;
pub mod hashing;
pub mod install;
pub mod loader;
pub mod metadata;
pub mod post_install;
pub mod remote_heads;
pub mod schema;
pub mod solver;
pub mod uninstall;
pub mod update;
pub mod upgrade;
pub mod version;
pub mod workspace;
