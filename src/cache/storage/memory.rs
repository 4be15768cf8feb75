//! In-memory backend
//!
//! Keeps stored files in a map. Useful for embedding the cache without a
//! local disk and for exercising failure paths: writes can be made to fail
//! or to stall for a fixed time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{validate_logical_path, DiskBackend, DiskUsage, StoredFile};
use crate::cache::sync_wrapper;
use crate::cache::traits::CacheOperationError;

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    info: Option<Vec<u8>>,
    last_access: SystemTime,
}

impl MemoryFile {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            info: None,
            last_access: SystemTime::now(),
        }
    }

    fn bytes(&self) -> u64 {
        (self.data.len() + self.info.as_ref().map_or(0, Vec::len)) as u64
    }
}

/// Map-backed store
#[derive(Debug, Default)]
pub struct MemoryDiskBackend {
    files: Mutex<BTreeMap<String, MemoryFile>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    block_writes: AtomicU64,
    /// Logical paths in the order their blocks were written
    write_log: Mutex<Vec<(String, u64)>>,
}

impl MemoryDiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent block write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stall every block write for `delay`
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful block writes
    pub fn block_writes(&self) -> u64 {
        self.block_writes.load(Ordering::SeqCst)
    }

    /// `(path, offset)` of every successful block write, oldest first
    pub fn write_log(&self) -> Vec<(String, u64)> {
        sync_wrapper::lock(&self.write_log).clone()
    }

    /// Seed a stored file of `bytes` zero bytes with a given access time
    pub fn insert_file(&self, path: &str, bytes: usize, last_access: SystemTime) {
        sync_wrapper::lock(&self.files).insert(
            path.to_string(),
            MemoryFile {
                data: vec![0u8; bytes],
                info: None,
                last_access,
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        sync_wrapper::lock(&self.files).contains_key(path)
    }

    /// Copy of the stored bytes of a file
    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        sync_wrapper::lock(&self.files)
            .get(path)
            .map(|file| file.data.clone())
    }
}

impl DiskBackend for MemoryDiskBackend {
    fn write_block(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), CacheOperationError> {
        validate_logical_path(path)?;
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheOperationError::io_failed(format!(
                "injected write failure for {}",
                path
            )));
        }
        let mut files = sync_wrapper::lock(&self.files);
        let file = files
            .entry(path.to_string())
            .or_insert_with(MemoryFile::empty);
        let start = offset as usize;
        let end = start + data.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[start..end].copy_from_slice(data);
        file.last_access = SystemTime::now();
        drop(files);

        self.block_writes.fetch_add(1, Ordering::SeqCst);
        sync_wrapper::lock(&self.write_log).push((path.to_string(), offset));
        Ok(())
    }

    fn read_block(
        &self,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, CacheOperationError> {
        let files = sync_wrapper::lock(&self.files);
        let file = files.get(path).ok_or(CacheOperationError::NotFound)?;
        let start = offset as usize;
        if start >= file.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(file.data.len() - start);
        buf[..n].copy_from_slice(&file.data[start..start + n]);
        Ok(n)
    }

    fn write_info(&self, path: &str, record: &[u8]) -> Result<(), CacheOperationError> {
        validate_logical_path(path)?;
        let mut files = sync_wrapper::lock(&self.files);
        files
            .entry(path.to_string())
            .or_insert_with(MemoryFile::empty)
            .info = Some(record.to_vec());
        Ok(())
    }

    fn read_info(&self, path: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        Ok(sync_wrapper::lock(&self.files)
            .get(path)
            .and_then(|file| file.info.clone()))
    }

    fn scan(&self) -> Result<DiskUsage, CacheOperationError> {
        let files = sync_wrapper::lock(&self.files);
        let mut usage = DiskUsage::default();
        for (path, file) in files.iter() {
            usage.total_bytes += file.bytes();
            usage.files.push(StoredFile {
                path: path.clone(),
                bytes: file.bytes(),
                last_access: file.last_access,
            });
        }
        Ok(usage)
    }

    fn remove(&self, path: &str) -> Result<u64, CacheOperationError> {
        Ok(sync_wrapper::lock(&self.files)
            .remove(path)
            .map_or(0, |file| file.bytes()))
    }

    fn touch(&self, path: &str) -> Result<(), CacheOperationError> {
        if let Some(file) = sync_wrapper::lock(&self.files).get_mut(path) {
            file.last_access = SystemTime::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_failure() {
        let backend = MemoryDiskBackend::new();
        backend.set_fail_writes(true);
        assert!(backend.write_block("/a", 0, b"abc").is_err());
        assert_eq!(backend.block_writes(), 0);

        backend.set_fail_writes(false);
        backend.write_block("/a", 4, b"abc").unwrap();
        assert_eq!(backend.file_data("/a").unwrap(), vec![0, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(backend.write_log(), vec![("/a".to_string(), 4)]);
    }

    #[test]
    fn test_scan_counts_info_records() {
        let backend = MemoryDiskBackend::new();
        backend.write_block("/a", 0, &[1u8; 10]).unwrap();
        backend.write_info("/a", &[0u8; 3]).unwrap();
        backend.insert_file("/b", 7, SystemTime::UNIX_EPOCH);

        let usage = backend.scan().unwrap();
        assert_eq!(usage.total_bytes, 20);
        assert_eq!(usage.files.len(), 2);
        assert_eq!(backend.remove("/a").unwrap(), 13);
        assert!(!backend.contains("/a"));
    }
}
