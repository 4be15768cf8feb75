//! The I/O layer the cache fronts
//!
//! A [`RemoteIo`] is whatever actually reaches the origin: a network
//! client, a storage gateway, or a plain local file for tools and tests.
//! The cache only needs a path for identity, a size and positional reads.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::cache::sync_wrapper::lock;
use crate::cache::traits::CacheOperationError;

/// Positional reader over one remote file
pub trait RemoteIo: Send + Sync {
    /// Logical path identifying the file in the cache store
    fn path(&self) -> &str;

    fn size(&self) -> Result<u64, CacheOperationError>;

    /// Read up to `buf.len()` bytes at `offset`; a short count means end of file
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, CacheOperationError>;
}

/// Keep reading until `buf` is full or the origin reports end of file
pub fn read_full(
    io: &dyn RemoteIo,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize, CacheOperationError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = io.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// A local file served as if it were remote
#[derive(Debug)]
pub struct LocalFileIo {
    path: String,
    file: Mutex<fs::File>,
    size: u64,
}

impl LocalFileIo {
    /// Open `source`; the cache identifies it by its absolute path
    pub fn open(source: impl AsRef<Path>) -> Result<Self, CacheOperationError> {
        let source = source.as_ref();
        let absolute: PathBuf = if source.is_absolute() {
            source.to_path_buf()
        } else {
            std::env::current_dir()?.join(source)
        };
        let file = fs::File::open(&absolute)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: absolute.to_string_lossy().into_owned(),
            file: Mutex::new(file),
            size,
        })
    }
}

impl RemoteIo for LocalFileIo {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> Result<u64, CacheOperationError> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, CacheOperationError> {
        let mut file = lock(&self.file);
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(buf)?)
    }
}

/// In-memory origin that counts the reads reaching it
#[derive(Debug)]
pub struct MemoryRemoteIo {
    path: String,
    data: Vec<u8>,
    reads: AtomicU64,
    bytes_read: AtomicU64,
}

impl MemoryRemoteIo {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
            reads: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    /// Number of `read_at` calls served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

impl RemoteIo for MemoryRemoteIo {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> Result<u64, CacheOperationError> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, CacheOperationError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
