//! Version management for orchestra
//!
//! Configurations may declare a `min_orchestra_version`; loading is refused
//! when the running orchestra is older.

use semver::{Version, VersionReq};
use thiserror::Error;

/// Current orchestra version from Cargo.toml
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors related to version checking
#[derive(Error, Debug, PartialEq)]
pub enum VersionError {
    /// Current orchestra version doesn't satisfy the required constraint
    #[error("Orchestra version {current} does not satisfy requirement '{constraint}' from {origin}. Please update orchestra to continue.")]
    VersionMismatch {
        current: String,
        constraint: String,
        origin: String,
    },

    /// Invalid version constraint format
    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    /// Invalid version format
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
}

/// Check that the running orchestra is at least `min_version`.
///
/// `min_version` is a plain version (`0.3.1`), interpreted as `>=0.3.1`.
/// Full semver requirements (`^0.3`, `>=0.2, <0.4`) are accepted too.
pub fn check_min_orchestra_version(min_version: &str, origin: &str) -> Result<(), VersionError> {
    let constraint = if Version::parse(min_version.trim()).is_ok() {
        format!(">={}", min_version.trim())
    } else {
        min_version.trim().to_string()
    };
    check_version_constraint(CURRENT_VERSION, &constraint, origin)
}

/// Check if a version satisfies a constraint
///
/// # Arguments
/// * `version` - The version to check
/// * `constraint` - A semver constraint string
/// * `origin` - Description of where the constraint came from
pub fn check_version_constraint(
    version: &str,
    constraint: &str,
    origin: &str,
) -> Result<(), VersionError> {
    let parsed_version = parse_version(version)?;
    let version_req = parse_constraint(constraint)?;

    if version_req.matches(&parsed_version) {
        Ok(())
    } else {
        Err(VersionError::VersionMismatch {
            current: version.to_string(),
            constraint: constraint.to_string(),
            origin: origin.to_string(),
        })
    }
}

/// Parse and validate a semver version string
pub fn parse_version(version: &str) -> Result<Version, VersionError> {
    Version::parse(version).map_err(|e| VersionError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Parse and validate a semver version constraint
pub fn parse_constraint(constraint: &str) -> Result<VersionReq, VersionError> {
    VersionReq::parse(constraint).map_err(|e| VersionError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: e.to_string(),
    })
}
