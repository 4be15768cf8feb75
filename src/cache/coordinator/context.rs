//! Shared resources every cached file works against
//!
//! Files hold an `Arc<CacheContext>`; the context never points back at
//! files, so dropping the last attachment frees a file without cycles.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::statistics::CacheStats;
use crate::cache::config::CacheConfig;
use crate::cache::memory::RamBufferPool;
use crate::cache::prefetch::PrefetchRegistry;
use crate::cache::storage::DiskBackend;
use crate::cache::sync_wrapper::lock;
use crate::cache::traits::CacheOperationError;
use crate::cache::write_queue::WriteQueue;

pub struct CacheContext {
    config: CacheConfig,
    pool: Arc<RamBufferPool>,
    queue: Arc<WriteQueue>,
    registry: Arc<PrefetchRegistry>,
    backend: Arc<dyn DiskBackend>,
    stats: CacheStats,
    /// Serializes purge removals with info updates from torn-down files
    records: Mutex<()>,
}

impl CacheContext {
    /// Validate `config` and size the pool and write queue from it
    pub fn new(
        config: CacheConfig,
        backend: Arc<dyn DiskBackend>,
    ) -> Result<Arc<Self>, CacheOperationError> {
        config.validate()?;
        let buffers = config.num_ram_buffers();
        let ceiling = config.write_queue_ceiling();
        log::info!(
            "Cache context: {} RAM buffers of {} bytes, write queue ceiling {} bytes",
            buffers,
            config.buffer_size,
            ceiling
        );
        Ok(Arc::new(Self {
            pool: Arc::new(RamBufferPool::new(buffers)),
            queue: Arc::new(WriteQueue::new(ceiling)),
            registry: Arc::new(PrefetchRegistry::new()),
            backend,
            stats: CacheStats::default(),
            records: Mutex::new(()),
            config,
        }))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[inline]
    pub fn buffer_size(&self) -> u64 {
        self.config.buffer_size.get()
    }

    pub fn pool(&self) -> &Arc<RamBufferPool> {
        &self.pool
    }

    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<PrefetchRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn DiskBackend> {
        &self.backend
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Held while a stored file is removed or a closed file updates its record
    pub(crate) fn lock_records(&self) -> MutexGuard<'_, ()> {
        lock(&self.records)
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("pool", &self.pool)
            .field("queued_blocks", &self.queue.len())
            .field("prefetch_files", &self.registry.len())
            .finish_non_exhaustive()
    }
}
