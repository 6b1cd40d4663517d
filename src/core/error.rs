//! Error types for dcp operations.
//!
//! This module defines the canonical error type used throughout dcp.
//! Only the configuration and stack loaders surface errors to callers;
//! everything downstream of planning encodes failure in Receipts.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Canonical error type for all dcp operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// The four `Config*` variants are pre-flight conditions that block all work;
/// they are the only errors a use case is allowed to observe.
#[derive(Error, Debug)]
pub enum DcpError {
    /// No project manifest could be located
    #[error("No project.yml found. Run from a project directory or pass --config.")]
    ConfigMissing,

    /// Manifest exists but could not be read
    #[error("Cannot read {path}: {source}")]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Manifest is not valid YAML, or not a mapping
    #[error("Invalid YAML in {path}: {message}")]
    ConfigMalformed { path: PathBuf, message: String },

    /// Manifest parsed but failed semantic validation
    #[error("Invalid project configuration: {0}")]
    ConfigInvalid(String),

    /// I/O error from persistence plumbing (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encode/decode error from persistence plumbing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_display() {
        let err = DcpError::ConfigInvalid("duplicate module names: api".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid project configuration: duplicate module names: api"
        );
    }

    #[test]
    fn test_config_malformed_display() {
        let err = DcpError::ConfigMalformed {
            path: PathBuf::from("project.yml"),
            message: "mapping values are not allowed".to_string(),
        };
        assert!(format!("{}", err).starts_with("Invalid YAML in project.yml"));
    }

    #[test]
    fn test_config_missing_display() {
        let err = DcpError::ConfigMissing;
        assert!(format!("{}", err).contains("No project.yml found"));
    }
}
