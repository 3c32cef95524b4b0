//! Orchestra - meta build system
//!
//! Orchestra installs a graph of interdependent software components into a
//! shared prefix, either by unpacking binary archives or by cloning,
//! configuring and building each component from source.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Configuration model, hashing, solver, executor and install pipeline
//! - [`infra`] - Infrastructure layer (git, shell scripts, filesystem, tarballs)
//! - [`config`] - Constants and defaults
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
