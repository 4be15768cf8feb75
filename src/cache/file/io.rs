//! Caller-facing caching handle

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use super::cached_file::CachedFile;
use super::unit_storage_path;
use crate::cache::coordinator::CacheCoordinator;
use crate::cache::remote::{read_full, RemoteIo};
use crate::cache::sync_wrapper::lock;
use crate::cache::traits::CacheOperationError;

enum FileSet {
    /// The whole remote file is one cached file
    Whole(Arc<CachedFile>),
    /// Block mode: one cached file per unit, opened on first touch
    Units {
        unit_size: u64,
        opened: Mutex<BTreeMap<u64, Arc<CachedFile>>>,
    },
}

/// Reads a remote file through the cache.
///
/// Returned by `attach`; dropping it (or calling [`CachingIo::detach`])
/// releases the attachment, and the last attachment of a file tears it down.
pub struct CachingIo {
    coordinator: Arc<CacheCoordinator>,
    remote: Arc<dyn RemoteIo>,
    size: u64,
    files: FileSet,
}

impl CachingIo {
    pub(crate) fn whole(
        coordinator: Arc<CacheCoordinator>,
        remote: Arc<dyn RemoteIo>,
        size: u64,
        file: Arc<CachedFile>,
    ) -> Self {
        Self {
            coordinator,
            remote,
            size,
            files: FileSet::Whole(file),
        }
    }

    pub(crate) fn units(
        coordinator: Arc<CacheCoordinator>,
        remote: Arc<dyn RemoteIo>,
        size: u64,
        unit_size: u64,
    ) -> Self {
        Self {
            coordinator,
            remote,
            size,
            files: FileSet::Units {
                unit_size,
                opened: Mutex::new(BTreeMap::new()),
            },
        }
    }

    /// Remote path this handle reads
    pub fn path(&self) -> &str {
        self.remote.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `buf.len()` bytes at `offset`; short only at end of file
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, CacheOperationError> {
        match &self.files {
            FileSet::Whole(file) => file.read_at(offset, buf),
            FileSet::Units { unit_size, opened } => {
                if offset >= self.size || buf.is_empty() {
                    return Ok(0);
                }
                let end = self.size.min(offset + buf.len() as u64);
                let mut pos = offset;
                while pos < end {
                    let unit = pos / unit_size;
                    let unit_start = unit * unit_size;
                    let chunk_end = end.min(unit_start + unit_size);
                    let dst = &mut buf[(pos - offset) as usize..(chunk_end - offset) as usize];
                    let n = match self.unit_file(opened, *unit_size, unit) {
                        Ok(file) => file.read_at(pos - unit_start, dst)?,
                        // no new units after shutdown; read around the cache
                        Err(CacheOperationError::ShutDown) => self.read_uncached(pos, dst)?,
                        Err(e) => return Err(e),
                    };
                    if n != dst.len() {
                        return Err(CacheOperationError::invalid_state(format!(
                            "unit {} of {} ended early",
                            unit,
                            self.path()
                        )));
                    }
                    pos = chunk_end;
                }
                Ok((end - offset) as usize)
            }
        }
    }

    fn unit_file(
        &self,
        opened: &Mutex<BTreeMap<u64, Arc<CachedFile>>>,
        unit_size: u64,
        unit: u64,
    ) -> Result<Arc<CachedFile>, CacheOperationError> {
        let mut opened = lock(opened);
        if let Some(file) = opened.get(&unit) {
            return Ok(Arc::clone(file));
        }
        let start = unit * unit_size;
        let file = self.coordinator.open_file(
            &self.remote,
            unit_storage_path(self.remote.path(), unit_size, unit),
            start,
            unit_size.min(self.size - start),
            self.size,
        )?;
        opened.insert(unit, Arc::clone(&file));
        Ok(file)
    }

    fn read_uncached(&self, pos: u64, dst: &mut [u8]) -> Result<usize, CacheOperationError> {
        let n = read_full(self.remote.as_ref(), pos, dst)?;
        self.coordinator.context().stats().record_bypass(n as u64);
        Ok(n)
    }

    /// Cached files currently backing this handle
    pub fn open_files(&self) -> Vec<Arc<CachedFile>> {
        match &self.files {
            FileSet::Whole(file) => vec![Arc::clone(file)],
            FileSet::Units { opened, .. } => lock(opened).values().cloned().collect(),
        }
    }

    /// Release this attachment now instead of at drop
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for CachingIo {
    fn drop(&mut self) {
        for file in self.open_files() {
            self.coordinator.release_file(file.storage_path());
        }
        self.coordinator.release_attachment(self.remote.path());
    }
}

impl fmt::Debug for CachingIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingIo")
            .field("path", &self.path())
            .field("size", &self.size)
            .field("block_mode", &matches!(self.files, FileSet::Units { .. }))
            .finish()
    }
}
