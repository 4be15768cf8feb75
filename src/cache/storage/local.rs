//! Local filesystem backend rooted at the configured cache directory

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{validate_logical_path, DiskBackend, DiskUsage, StoredFile, INFO_SUFFIX};
use crate::cache::traits::CacheOperationError;

/// Stores each cached file as `<root>/<logical path>` plus a `.cinfo` sidecar
#[derive(Debug, Clone)]
pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    /// Create the backend, creating `root` if it does not exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheOperationError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            CacheOperationError::io_failed(format!(
                "cannot create cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        log::info!("Local disk store rooted at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, path: &str) -> Result<PathBuf, CacheOperationError> {
        validate_logical_path(path)?;
        Ok(self.root.join(path.trim_start_matches('/')))
    }

    fn info_path(&self, path: &str) -> Result<PathBuf, CacheOperationError> {
        let mut data = self.data_path(path)?.into_os_string();
        data.push(INFO_SUFFIX);
        Ok(PathBuf::from(data))
    }

    fn ensure_parent(path: &Path) -> Result<(), CacheOperationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Convert an on-disk path back into the logical path it stores
    fn logical_path(&self, on_disk: &Path) -> Option<String> {
        let relative = on_disk.strip_prefix(&self.root).ok()?;
        let mut logical = String::new();
        for component in relative.components() {
            logical.push('/');
            logical.push_str(component.as_os_str().to_str()?);
        }
        Some(logical)
    }

    fn scan_dir(&self, dir: &Path, usage: &mut DiskUsage) -> Result<(), CacheOperationError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                self.scan_dir(&path, usage)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let metadata = entry.metadata()?;
            usage.total_bytes += metadata.len();

            let is_info = path
                .to_str()
                .map(|p| p.ends_with(INFO_SUFFIX) || p.ends_with(".cinfo.tmp"))
                .unwrap_or(false);
            if is_info {
                continue;
            }
            let Some(logical) = self.logical_path(&path) else {
                log::warn!("Skipping non UTF-8 cache entry {}", path.display());
                continue;
            };
            let info_bytes = self
                .info_path(&logical)
                .ok()
                .and_then(|info| fs::metadata(info).ok())
                .map(|m| m.len())
                .unwrap_or(0);
            usage.files.push(StoredFile {
                path: logical,
                bytes: metadata.len() + info_bytes,
                last_access: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(())
    }
}

impl DiskBackend for LocalDiskBackend {
    fn write_block(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), CacheOperationError> {
        let target = self.data_path(path)?;
        Self::ensure_parent(&target)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&target)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn read_block(
        &self,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, CacheOperationError> {
        let mut file = File::open(self.data_path(path)?)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(read)
    }

    fn write_info(&self, path: &str, record: &[u8]) -> Result<(), CacheOperationError> {
        let target = self.info_path(path)?;
        Self::ensure_parent(&target)?;
        let mut staging = target.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, record)?;
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn read_info(&self, path: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        match fs::read(self.info_path(path)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn scan(&self) -> Result<DiskUsage, CacheOperationError> {
        let mut usage = DiskUsage::default();
        self.scan_dir(&self.root, &mut usage)?;
        Ok(usage)
    }

    fn remove(&self, path: &str) -> Result<u64, CacheOperationError> {
        let mut freed = 0;
        for target in [self.data_path(path)?, self.info_path(path)?] {
            match fs::metadata(&target) {
                Ok(metadata) => {
                    fs::remove_file(&target)?;
                    freed += metadata.len();
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(freed)
    }

    fn touch(&self, path: &str) -> Result<(), CacheOperationError> {
        let target = self.data_path(path)?;
        match OpenOptions::new().write(true).open(&target) {
            Ok(file) => {
                file.set_modified(SystemTime::now())?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
