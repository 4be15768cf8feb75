//! Per-file caching layer
//!
//! [`CachedFile`] produces blocks for the core engine: it reserves RAM
//! buffers, submits filled blocks to the write queue, registers itself for
//! prefetch and withdraws its queued writes on teardown. [`CachingIo`] is
//! the handle callers read through.

pub mod cached_file;
pub mod info;
pub mod io;

pub use cached_file::CachedFile;
pub use info::{FileInfo, FileStat};
pub use io::CachingIo;

/// Logical store path for a remote path
pub fn storage_path_for(remote_path: &str) -> String {
    format!("/{}", remote_path.trim_start_matches('/'))
}

/// Store path of one block-mode unit, `<path>___<unit size>_<unit offset>`
pub fn unit_storage_path(remote_path: &str, unit_size: u64, unit_index: u64) -> String {
    format!(
        "{}___{}_{}",
        storage_path_for(remote_path),
        unit_size,
        unit_index * unit_size
    )
}
