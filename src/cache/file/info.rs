//! Per-file info record stored next to the cached data
//!
//! Tracks which blocks already reached disk so a file reopened later, or
//! after a restart, is served from disk without refetching.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::traits::CacheOperationError;

pub const INFO_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    version: u32,
    /// Bytes of the cached file (one unit in block mode)
    file_size: u64,
    /// Size of the whole remote file
    origin_size: u64,
    buffer_size: u64,
    /// One bit per block, set once the block is on disk
    downloaded: Vec<u64>,
    access_count: u64,
    /// Seconds since the Unix epoch, 0 when never accessed
    last_access_secs: u64,
}

impl FileInfo {
    pub fn new(file_size: u64, origin_size: u64, buffer_size: u64) -> Self {
        let blocks = block_count(file_size, buffer_size);
        Self {
            version: INFO_FORMAT_VERSION,
            file_size,
            origin_size,
            buffer_size,
            downloaded: vec![0; blocks.div_ceil(64) as usize],
            access_count: 0,
            last_access_secs: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheOperationError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheOperationError::SerializationError(e.to_string()))
    }

    /// Decode a stored record, rejecting other format versions
    pub fn decode(bytes: &[u8]) -> Result<Self, CacheOperationError> {
        let (info, _): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CacheOperationError::DeserializationError(e.to_string()))?;
        if info.version != INFO_FORMAT_VERSION {
            return Err(CacheOperationError::DeserializationError(format!(
                "unsupported info record version {}",
                info.version
            )));
        }
        if info.downloaded.len() as u64 != info.num_blocks().div_ceil(64) {
            return Err(CacheOperationError::DeserializationError(
                "info record bitmap does not match file size".into(),
            ));
        }
        Ok(info)
    }

    /// True when the record describes a file of this shape
    pub fn matches(&self, file_size: u64, buffer_size: u64) -> bool {
        self.file_size == file_size && self.buffer_size == buffer_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn origin_size(&self) -> u64 {
        self.origin_size
    }

    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub fn num_blocks(&self) -> u64 {
        block_count(self.file_size, self.buffer_size)
    }

    pub fn is_downloaded(&self, index: u64) -> bool {
        self.downloaded
            .get((index / 64) as usize)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn set_downloaded(&mut self, index: u64) {
        if let Some(word) = self.downloaded.get_mut((index / 64) as usize) {
            *word |= 1 << (index % 64);
        }
    }

    pub fn clear_downloaded(&mut self, index: u64) {
        if let Some(word) = self.downloaded.get_mut((index / 64) as usize) {
            *word &= !(1 << (index % 64));
        }
    }

    pub fn downloaded_blocks(&self) -> u64 {
        self.downloaded.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded_blocks() == self.num_blocks()
    }

    /// Bytes of the file already on disk
    pub fn cached_bytes(&self) -> u64 {
        (0..self.num_blocks())
            .filter(|&i| self.is_downloaded(i))
            .map(|i| block_len(i, self.file_size, self.buffer_size))
            .sum()
    }

    pub fn record_access(&mut self, now: SystemTime) {
        self.access_count += 1;
        self.last_access_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_access(&self) -> Option<SystemTime> {
        (self.last_access_secs > 0)
            .then(|| UNIX_EPOCH + Duration::from_secs(self.last_access_secs))
    }
}

/// Number of `buffer_size` blocks covering `file_size` bytes
pub fn block_count(file_size: u64, buffer_size: u64) -> u64 {
    if buffer_size == 0 {
        0
    } else {
        file_size.div_ceil(buffer_size)
    }
}

/// Length of block `index`; the last block may be short
pub fn block_len(index: u64, file_size: u64, buffer_size: u64) -> u64 {
    let start = index * buffer_size;
    buffer_size.min(file_size.saturating_sub(start))
}

/// What `stat` reports about a cached path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size of the remote file
    pub size: u64,
    /// Bytes already stored locally
    pub cached_bytes: u64,
    pub complete: bool,
    pub access_count: u64,
    pub last_access: Option<SystemTime>,
}

impl FileStat {
    pub(crate) fn from_info(info: &FileInfo) -> Self {
        Self {
            size: info.origin_size(),
            cached_bytes: info.cached_bytes(),
            complete: info.is_complete(),
            access_count: info.access_count(),
            last_access: info.last_access(),
        }
    }

    /// Fold one block-mode unit into a whole-file stat
    pub(crate) fn merge_unit(&mut self, unit: &FileInfo) {
        self.cached_bytes += unit.cached_bytes();
        self.complete &= unit.is_complete();
        self.access_count = self.access_count.max(unit.access_count());
        self.last_access = self.last_access.max(unit.last_access());
    }
}
