//! Error types for LogDoctor
//!
//! This module defines all error types used throughout LogDoctor. Uses
//! `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.
//!
//! Propagation policy: errors local to one plugin (`Load`,
//! `ContractViolation`, `Execution`, `ResultFormat`) never escape the
//! aggregator; sync errors in enforced mode always escape to the caller.

use thiserror::Error;

/// The primary error type for LogDoctor operations.
#[derive(Error, Debug)]
pub enum DoctorError {
    /// Transient network failures (timeout, DNS, non-2xx responses).
    /// Retried only at the discretion of the caller, never swallowed.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote catalog was unparseable or missing required fields.
    #[error("Catalog format error: {0}")]
    CatalogFormat(String),

    /// A plugin returned a result with an unexpected shape
    /// (wrong type, missing required key).
    #[error("Result format error: {0}")]
    ResultFormat(String),

    /// Enforced-mode synchronization failed; the run must not proceed
    /// against a cache of unknown trustworthiness.
    #[error("Sync error: {0}")]
    Sync(String),

    /// A cached plugin entry file is malformed or failed to initialize.
    #[error("Load error: {0}")]
    Load(String),

    /// A loaded plugin does not expose the required entry capability.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// A plugin failed while running against the input directory.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Resource not found (plugin path, remedy document, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related errors (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for LogDoctor operations.
pub type Result<T> = std::result::Result<T, DoctorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DoctorError::Sync("remote unreachable".to_string());
        assert_eq!(err.to_string(), "Sync error: remote unreachable");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DoctorError = io_err.into();
        assert!(matches!(err, DoctorError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ broken").unwrap_err();
        let err: DoctorError = json_err.into();
        assert!(matches!(err, DoctorError::Json(_)));
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }

    #[test]
    fn test_error_variants() {
        // Ensure all variants can be created
        let _ = DoctorError::Network("test".into());
        let _ = DoctorError::CatalogFormat("test".into());
        let _ = DoctorError::ResultFormat("test".into());
        let _ = DoctorError::Sync("test".into());
        let _ = DoctorError::Load("test".into());
        let _ = DoctorError::ContractViolation("test".into());
        let _ = DoctorError::Execution("test".into());
        let _ = DoctorError::NotFound("test".into());
        let _ = DoctorError::Config("test".into());
    }

    #[test]
    fn test_contract_violation_display() {
        let err = DoctorError::ContractViolation("no entry capability".to_string());
        assert_eq!(err.to_string(), "Contract violation: no entry capability");
    }
}
