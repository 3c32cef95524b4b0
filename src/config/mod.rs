//! Configuration constants
//!
//! Compile-time defaults shared by the model, the install pipeline and the CLI.

pub mod defaults;
