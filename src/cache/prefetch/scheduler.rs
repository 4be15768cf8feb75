//! Prefetch scheduling loop
//!
//! One step: check write-queue admission, reserve a RAM buffer, pick the
//! next file round-robin, enforce the per-file cap, and hand the file the
//! reservation. The loop parks on the registry (nothing registered), on the
//! RAM pool (no free buffer) or for an idle interval (everyone busy), so it
//! never spins.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::registry::PrefetchRegistry;
use crate::cache::memory::RamBufferPool;
use crate::cache::traits::{CacheOperationError, FileId, PrefetchOutcome};
use crate::cache::write_queue::WriteQueue;

/// What a single scheduling step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStep {
    /// No file is registered
    NoFiles,
    /// RAM pool exhausted
    NoRam,
    /// Write queue above its admission ceiling
    QueueFull,
    /// Picked file already has the maximum outstanding prefetch blocks
    FileAtCap(FileId),
    Issued(FileId),
    /// File could not issue a block right now
    Busy(FileId),
    /// File reported full coverage
    Complete(FileId),
}

/// Decides which file receives the next speculative read
#[derive(Debug, Clone)]
pub struct Prefetcher {
    registry: Arc<PrefetchRegistry>,
    pool: Arc<RamBufferPool>,
    queue: Arc<WriteQueue>,
    enabled: bool,
    max_blocks_per_file: usize,
    idle_wait: Duration,
}

impl Prefetcher {
    pub fn new(
        registry: Arc<PrefetchRegistry>,
        pool: Arc<RamBufferPool>,
        queue: Arc<WriteQueue>,
        enabled: bool,
        max_blocks_per_file: usize,
        idle_wait: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            queue,
            enabled,
            max_blocks_per_file,
            idle_wait,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Perform one scheduling decision without waiting
    pub fn prefetch_step(&self) -> PrefetchStep {
        if self.registry.is_empty() {
            return PrefetchStep::NoFiles;
        }
        if !self.queue.have_free_writing_slots() {
            return PrefetchStep::QueueFull;
        }
        let Some(reservation) = self.pool.try_reserve() else {
            return PrefetchStep::NoRam;
        };
        let Some(file) = self.registry.get_next_file_to_prefetch() else {
            return PrefetchStep::NoFiles;
        };
        let id = file.file_id();
        if file.prefetch_blocks_in_flight() >= self.max_blocks_per_file {
            return PrefetchStep::FileAtCap(id);
        }
        match file.prefetch_block(reservation) {
            PrefetchOutcome::Issued => PrefetchStep::Issued(id),
            PrefetchOutcome::Busy => PrefetchStep::Busy(id),
            PrefetchOutcome::Complete => PrefetchStep::Complete(id),
        }
    }

    /// Prefetch loop body. Runs until the registry is shut down.
    pub fn prefetch(&self) {
        if !self.enabled {
            log::debug!("Prefetch disabled, scheduler not running");
            return;
        }
        log::debug!(
            "Prefetch loop started (max {} blocks per file)",
            self.max_blocks_per_file
        );
        // steps since the last issued block; once every registered file was
        // tried without progress the loop parks instead of cycling again
        let mut unproductive = 0usize;
        while !self.registry.is_shut_down() {
            match self.prefetch_step() {
                PrefetchStep::NoFiles => {
                    unproductive = 0;
                    self.registry.wait_for_files(self.idle_wait);
                }
                PrefetchStep::NoRam => {
                    self.pool.wait_for_release(self.idle_wait);
                }
                PrefetchStep::QueueFull => {
                    self.registry.park(self.idle_wait);
                }
                PrefetchStep::Issued(_) => unproductive = 0,
                PrefetchStep::FileAtCap(_) | PrefetchStep::Busy(_) | PrefetchStep::Complete(_) => {
                    unproductive += 1;
                    if unproductive >= self.registry.len().max(1) {
                        unproductive = 0;
                        self.registry.park(self.idle_wait);
                    }
                }
            }
        }
        log::debug!("Prefetch loop finished");
    }
}

/// Dedicated prefetch thread
pub struct PrefetchWorker {
    registry: Arc<PrefetchRegistry>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchWorker {
    pub fn start(prefetcher: Prefetcher) -> Result<Self, CacheOperationError> {
        let registry = Arc::clone(&prefetcher.registry);
        let handle = thread::Builder::new()
            .name("proxycache-prefetch".to_string())
            .spawn(move || prefetcher.prefetch())
            .map_err(|e| {
                log::error!("Failed to spawn prefetch thread: {}", e);
                CacheOperationError::initialization_failed(format!(
                    "prefetch thread spawn failed: {}",
                    e
                ))
            })?;
        log::info!("Prefetch thread started");
        Ok(Self {
            registry,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.registry.shutdown();
            if handle.join().is_err() {
                log::error!("Prefetch thread panicked");
            }
            log::info!("Prefetch thread stopped");
        }
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::super::registry::test_support::CountingSource;
    use super::*;
    use crate::cache::traits::PrefetchSource;
    use std::time::Instant;

    fn prefetcher(
        pool_size: usize,
        max_per_file: usize,
    ) -> (Prefetcher, Arc<PrefetchRegistry>, Arc<RamBufferPool>) {
        let registry = Arc::new(PrefetchRegistry::new());
        let pool = Arc::new(RamBufferPool::new(pool_size));
        let queue = Arc::new(WriteQueue::new(1 << 20));
        let prefetcher = Prefetcher::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            queue,
            true,
            max_per_file,
            Duration::from_millis(5),
        );
        (prefetcher, registry, pool)
    }

    #[test]
    fn test_step_without_files() {
        let (prefetcher, _, pool) = prefetcher(2, 4);
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::NoFiles);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_step_rotates_and_issues() {
        let (prefetcher, registry, pool) = prefetcher(8, 4);
        let a = CountingSource::new(1, 5);
        let b = CountingSource::new(2, 5);
        let (sa, sb): (Arc<dyn PrefetchSource>, Arc<dyn PrefetchSource>) = (a.clone(), b.clone());
        registry.register_prefetch_file(&sa);
        registry.register_prefetch_file(&sb);

        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(1)));
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(2)));
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(1)));
        assert_eq!(a.issued(), 2);
        assert_eq!(b.issued(), 1);
        // counting sources drop their reservations immediately
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_no_ram_defers() {
        let (prefetcher, registry, pool) = prefetcher(1, 4);
        let a = CountingSource::new(1, 5);
        let sa: Arc<dyn PrefetchSource> = a.clone();
        registry.register_prefetch_file(&sa);

        assert!(pool.request_ram_block());
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::NoRam);
        assert_eq!(a.issued(), 0);
        pool.ram_block_released();
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(1)));
    }

    #[test]
    fn test_per_file_cap() {
        let (prefetcher, registry, pool) = prefetcher(8, 2);
        let a = CountingSource::holding(1, 10);
        let sa: Arc<dyn PrefetchSource> = a.clone();
        registry.register_prefetch_file(&sa);

        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(1)));
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::Issued(FileId(1)));
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::FileAtCap(FileId(1)));
        assert_eq!(pool.used(), 2);
    }

    #[test]
    fn test_queue_full_blocks_prefetch() {
        let registry = Arc::new(PrefetchRegistry::new());
        let pool = Arc::new(RamBufferPool::new(4));
        let queue = Arc::new(WriteQueue::new(0));
        let prefetcher = Prefetcher::new(
            Arc::clone(&registry),
            pool,
            queue,
            true,
            4,
            Duration::from_millis(5),
        );
        let a = CountingSource::new(1, 5);
        let sa: Arc<dyn PrefetchSource> = a.clone();
        registry.register_prefetch_file(&sa);
        assert_eq!(prefetcher.prefetch_step(), PrefetchStep::QueueFull);
    }

    #[test]
    fn test_loop_serves_files_and_stops() {
        let (prefetcher, registry, _pool) = prefetcher(4, 4);
        let a = CountingSource::new(1, 3);
        let b = CountingSource::new(2, 2);
        let (sa, sb): (Arc<dyn PrefetchSource>, Arc<dyn PrefetchSource>) = (a.clone(), b.clone());

        let mut worker = PrefetchWorker::start(prefetcher).unwrap();
        registry.register_prefetch_file(&sa);
        registry.register_prefetch_file(&sb);

        let deadline = Instant::now() + Duration::from_secs(5);
        while (a.issued() < 3 || b.issued() < 2) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();

        // the scheduler never drops files on its own
        assert_eq!(registry.len(), 2);
        assert_eq!(a.issued(), 3);
        assert_eq!(b.issued(), 2);
    }

    #[test]
    fn test_disabled_prefetcher_returns_immediately() {
        let registry = Arc::new(PrefetchRegistry::new());
        let prefetcher = Prefetcher::new(
            registry,
            Arc::new(RamBufferPool::new(1)),
            Arc::new(WriteQueue::new(1)),
            false,
            1,
            Duration::from_millis(5),
        );
        prefetcher.prefetch();
        assert!(!prefetcher.is_enabled());
    }
}
