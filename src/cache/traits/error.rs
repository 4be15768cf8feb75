//! Error type shared by every cache component
//!
//! Capacity exhaustion (no RAM buffer, write queue full) and decision-gate
//! rejections are not errors and never show up here; they are reported as
//! `bool`/`Option` results so callers can back off or skip caching.

use std::fmt;

/// Recovery hint attached to an error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Retry later, the condition is transient
    RetryBackoff,
    /// Serve the read uncached
    Fallback,
    /// No recovery possible, fix configuration or environment
    Fatal,
}

/// Cache operation error types
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOperationError {
    /// Configuration rejected at startup
    InvalidConfiguration(String),
    /// Local disk store I/O failure
    Io(String),
    /// Stored data or info record does not match expectations
    StorageError(String),
    /// The fronted remote I/O failed
    RemoteError(String),
    /// Operation on an object in the wrong lifecycle state
    InvalidState(String),
    /// Requested path is not present in the local store
    NotFound,
    SerializationError(String),
    DeserializationError(String),
    /// Background thread could not be started
    InitializationFailed(String),
    /// Component is shut down
    ShutDown,
}

impl fmt::Display for CacheOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOperationError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
            CacheOperationError::Io(msg) => write!(f, "I/O error: {}", msg),
            CacheOperationError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            CacheOperationError::RemoteError(msg) => write!(f, "Remote I/O error: {}", msg),
            CacheOperationError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CacheOperationError::NotFound => write!(f, "Not found"),
            CacheOperationError::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            CacheOperationError::DeserializationError(msg) => {
                write!(f, "Deserialization error: {}", msg)
            }
            CacheOperationError::InitializationFailed(msg) => {
                write!(f, "Initialization failed: {}", msg)
            }
            CacheOperationError::ShutDown => write!(f, "Cache is shut down"),
        }
    }
}

impl std::error::Error for CacheOperationError {}

impl From<std::io::Error> for CacheOperationError {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            CacheOperationError::NotFound
        } else {
            CacheOperationError::Io(error.to_string())
        }
    }
}

impl CacheOperationError {
    /// Create invalid configuration error
    #[inline(always)]
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create IO error
    #[inline(always)]
    pub fn io_failed(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create remote IO error
    #[inline(always)]
    pub fn remote_failed(msg: impl Into<String>) -> Self {
        Self::RemoteError(msg.into())
    }

    /// Create invalid state error
    #[inline(always)]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create storage error
    #[inline(always)]
    pub fn storage_failed(msg: impl Into<String>) -> Self {
        Self::StorageError(msg.into())
    }

    /// Create initialization error
    #[inline(always)]
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Recovery hint for this error
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            CacheOperationError::InvalidConfiguration(_)
            | CacheOperationError::InitializationFailed(_) => RecoveryHint::Fatal,
            CacheOperationError::RemoteError(_) => RecoveryHint::RetryBackoff,
            _ => RecoveryHint::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: CacheOperationError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err, CacheOperationError::NotFound);

        let err: CacheOperationError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, CacheOperationError::Io(_)));
    }

    #[test]
    fn test_recovery_hints() {
        assert_eq!(
            CacheOperationError::invalid_configuration("bad").recovery_hint(),
            RecoveryHint::Fatal
        );
        assert_eq!(
            CacheOperationError::remote_failed("timeout").recovery_hint(),
            RecoveryHint::RetryBackoff
        );
        assert_eq!(
            CacheOperationError::io_failed("disk").recovery_hint(),
            RecoveryHint::Fallback
        );
    }
}
