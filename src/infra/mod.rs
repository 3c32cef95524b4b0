//! Infrastructure layer
//!
//! Handles all side effects against the outside world: git, shell scripts,
//! the filesystem and tar archives.

pub mod archive;
pub mod filesystem;
pub mod git;
pub mod script;
