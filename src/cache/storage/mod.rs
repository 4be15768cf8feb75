//! Disk I/O backend for cached blocks
//!
//! The core only needs three answers from storage: did a block write
//! succeed, how many bytes does the store occupy, and remove this file.
//! Paths are logical (the remote path of the cached file); the backend
//! decides how they map onto its medium.

pub mod local;
pub mod memory;

use std::time::SystemTime;

use crate::cache::traits::CacheOperationError;

pub use local::LocalDiskBackend;
pub use memory::MemoryDiskBackend;

/// Suffix of the per-file info record stored next to the data
pub const INFO_SUFFIX: &str = ".cinfo";

/// One cached file as seen by an occupancy scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Logical path of the cached file
    pub path: String,
    /// Bytes used on disk, info record included
    pub bytes: u64,
    /// Last time the file was read or written through the cache
    pub last_access: SystemTime,
}

/// Result of scanning the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub files: Vec<StoredFile>,
}

/// Storage medium for written blocks and info records
pub trait DiskBackend: Send + Sync {
    /// Write `data` at `offset` of the stored file, creating it if needed
    fn write_block(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), CacheOperationError>;

    /// Read up to `buf.len()` bytes at `offset`; returns the byte count
    fn read_block(&self, path: &str, offset: u64, buf: &mut [u8])
        -> Result<usize, CacheOperationError>;

    /// Replace the info record of a stored file
    fn write_info(&self, path: &str, record: &[u8]) -> Result<(), CacheOperationError>;

    /// Load the info record, `None` if the file was never cached
    fn read_info(&self, path: &str) -> Result<Option<Vec<u8>>, CacheOperationError>;

    /// Recompute occupancy of the whole store
    fn scan(&self) -> Result<DiskUsage, CacheOperationError>;

    /// Remove a stored file and its info record; returns bytes freed
    fn remove(&self, path: &str) -> Result<u64, CacheOperationError>;

    /// Record an access for eviction ordering
    fn touch(&self, _path: &str) -> Result<(), CacheOperationError> {
        Ok(())
    }
}

/// Reject logical paths that could escape the store
pub(crate) fn validate_logical_path(path: &str) -> Result<(), CacheOperationError> {
    if path.is_empty() {
        return Err(CacheOperationError::invalid_state("empty storage path"));
    }
    if path.split('/').any(|component| component == "..") {
        return Err(CacheOperationError::invalid_state(format!(
            "storage path '{}' contains a parent component",
            path
        )));
    }
    if path.ends_with(INFO_SUFFIX) {
        return Err(CacheOperationError::invalid_state(format!(
            "storage path '{}' collides with the info record suffix",
            path
        )));
    }
    Ok(())
}
