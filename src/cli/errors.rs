//! CLI-specific error handling
//!
//! Maps cache operation errors to user-facing messages and exit codes.

use std::fmt;

use crate::cache::traits::CacheOperationError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Cache operation error
    CacheError(CacheOperationError),
    /// Configuration error
    ConfigError(String),
    /// Input/output error
    IoError(std::io::Error),
    /// JSON output error
    JsonError(serde_json::Error),
    /// Invalid argument error
    ArgumentError(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigError(_)
            | CliError::ArgumentError(_)
            | CliError::CacheError(CacheOperationError::InvalidConfiguration(_)) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::CacheError(e) => write!(f, "Cache error: {}", e),
            CliError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            CliError::IoError(e) => write!(f, "I/O error: {}", e),
            CliError::JsonError(e) => write!(f, "JSON error: {}", e),
            CliError::ArgumentError(msg) => write!(f, "Argument error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::CacheError(e) => Some(e),
            CliError::IoError(e) => Some(e),
            CliError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CacheOperationError> for CliError {
    fn from(error: CacheOperationError) -> Self {
        CliError::CacheError(error)
    }
}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        CliError::IoError(error)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        CliError::JsonError(error)
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
