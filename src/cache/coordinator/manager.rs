//! Attach/detach lifecycle and background thread ownership

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::context::CacheContext;
use super::statistics::CacheStatsSnapshot;
use crate::cache::decision::{DecisionChain, DecisionTarget};
use crate::cache::file::info::block_count;
use crate::cache::file::{
    storage_path_for, unit_storage_path, CachedFile, CachingIo, FileInfo, FileStat,
};
use crate::cache::memory::RamPoolStatsSnapshot;
use crate::cache::prefetch::{PrefetchWorker, Prefetcher};
use crate::cache::purge::{
    EvictionGuard, PurgeLoop, PurgeReport, PurgeStatsSnapshot, PurgeWorker,
};
use crate::cache::remote::RemoteIo;
use crate::cache::storage::validate_logical_path;
use crate::cache::sync_wrapper::lock;
use crate::cache::traits::{CacheOperationError, FileId};
use crate::cache::write_queue::{WriteQueueStatsSnapshot, WriterPool};

struct OpenFile {
    file: Arc<CachedFile>,
    attachments: usize,
}

/// Purge access to the open-file index.
///
/// A removal runs while the vacant index entry of its path is held, so
/// `open_file` for that path waits until the stored data is gone.
struct OpenFileGuard {
    open: Arc<DashMap<String, OpenFile>>,
    ctx: Arc<CacheContext>,
}

impl EvictionGuard for OpenFileGuard {
    fn evict_if_idle(
        &self,
        path: &str,
        remove: &mut dyn FnMut() -> Result<u64, CacheOperationError>,
    ) -> Option<Result<u64, CacheOperationError>> {
        match self.open.entry(path.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(_held) => {
                let _records = self.ctx.lock_records();
                Some(remove())
            }
        }
    }
}

#[derive(Default)]
struct Workers {
    writers: Option<WriterPool>,
    prefetch: Option<PrefetchWorker>,
    purge: Option<PurgeWorker>,
}

/// Everything `stats()` reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyCacheStats {
    pub cache: CacheStatsSnapshot,
    pub ram: RamPoolStatsSnapshot,
    pub write_queue: WriteQueueStatsSnapshot,
    pub purge: PurgeStatsSnapshot,
    /// Live `CachingIo` handles
    pub attached: usize,
    /// Cached files currently open
    pub open_files: usize,
    pub prefetch_files: usize,
}

pub struct CacheCoordinator {
    ctx: Arc<CacheContext>,
    decisions: DecisionChain,
    purge: Arc<PurgeLoop>,
    /// Open cached files by store path
    open: Arc<DashMap<String, OpenFile>>,
    attached: AtomicUsize,
    next_file_id: AtomicU64,
    shut_down: AtomicBool,
    workers: Mutex<Workers>,
}

impl CacheCoordinator {
    /// Build the coordinator and start its writer, prefetch and purge threads
    pub fn new(
        ctx: Arc<CacheContext>,
        decisions: DecisionChain,
    ) -> Result<Arc<Self>, CacheOperationError> {
        let (lwm, hwm) = ctx.config().watermarks()?;
        let coordinator = Arc::new(Self {
            ctx,
            decisions,
            purge: Arc::new(PurgeLoop::new(lwm, hwm)),
            open: Arc::new(DashMap::new()),
            attached: AtomicUsize::new(0),
            next_file_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            workers: Mutex::new(Workers::default()),
        });
        coordinator.start_workers()?;
        Ok(coordinator)
    }

    fn start_workers(&self) -> Result<(), CacheOperationError> {
        let config = self.ctx.config();
        let writers = WriterPool::start(
            Arc::clone(self.ctx.queue()),
            Arc::clone(self.ctx.backend()),
            config.writer_threads,
        )?;
        let prefetch = if config.prefetch_enabled {
            Some(PrefetchWorker::start(Prefetcher::new(
                Arc::clone(self.ctx.registry()),
                Arc::clone(self.ctx.pool()),
                Arc::clone(self.ctx.queue()),
                true,
                config.prefetch_max_blocks_per_file,
                config.prefetch_idle_wait(),
            ))?)
        } else {
            None
        };
        let purge = PurgeWorker::start(
            Arc::clone(&self.purge),
            Arc::clone(self.ctx.backend()),
            self.eviction_guard(),
            config.purge_interval(),
        )?;
        *lock(&self.workers) = Workers {
            writers: Some(writers),
            prefetch,
            purge: Some(purge),
        };
        Ok(())
    }

    /// Purge skips any stored file that is currently open
    fn eviction_guard(&self) -> Arc<dyn EvictionGuard> {
        Arc::new(OpenFileGuard {
            open: Arc::clone(&self.open),
            ctx: Arc::clone(&self.ctx),
        })
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.ctx
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Run the decision chain for `io`
    pub fn decide(&self, io: &dyn RemoteIo) -> bool {
        let size = io.size().ok();
        self.decisions.decide(&DecisionTarget::new(io.path(), size))
    }

    /// Whether `path` can be cached right now.
    ///
    /// An unreadable info record left by an earlier session is discarded
    /// here so the file starts over cleanly.
    pub fn prepare(&self, path: &str) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let storage = if self.ctx.config().block_mode {
            unit_storage_path(path, self.ctx.config().block_mode_unit_size.get(), 0)
        } else {
            storage_path_for(path)
        };
        if let Err(e) = validate_logical_path(&storage) {
            log::debug!("Not caching {}: {}", path, e);
            return false;
        }
        if self.open.contains_key(&storage) {
            return true;
        }
        match self.ctx.backend().read_info(&storage) {
            Ok(Some(bytes)) => {
                if let Err(e) = FileInfo::decode(&bytes) {
                    log::warn!("Discarding unreadable cache entry {}: {}", storage, e);
                    if let Err(e) = self.ctx.backend().remove(&storage) {
                        log::warn!("Could not remove {}: {}", storage, e);
                    }
                }
                true
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("Cache store unreadable for {}: {}", path, e);
                false
            }
        }
    }

    /// What the local store knows about `path`, without touching the remote
    pub fn stat(&self, path: &str) -> Option<FileStat> {
        if !self.ctx.config().block_mode {
            return self
                .current_info(&storage_path_for(path))
                .map(|info| FileStat::from_info(&info));
        }
        let unit_size = self.ctx.config().block_mode_unit_size.get();
        let first = self.current_info(&unit_storage_path(path, unit_size, 0))?;
        let mut stat = FileStat::from_info(&first);
        for unit in 1..block_count(first.origin_size(), unit_size) {
            match self.current_info(&unit_storage_path(path, unit_size, unit)) {
                Some(info) => stat.merge_unit(&info),
                None => stat.complete = false,
            }
        }
        Some(stat)
    }

    /// Live record of an open file, else the stored one
    fn current_info(&self, storage: &str) -> Option<FileInfo> {
        let open = self.open.get(storage).map(|entry| Arc::clone(&entry.file));
        if let Some(file) = open {
            return Some(file.info());
        }
        match self.ctx.backend().read_info(storage) {
            Ok(Some(bytes)) => FileInfo::decode(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                log::debug!("No info record for {}: {}", storage, e);
                None
            }
        }
    }

    /// Wrap `io` in a caching handle, or `None` when it should not be cached
    pub fn attach(self: &Arc<Self>, io: Arc<dyn RemoteIo>) -> Option<CachingIo> {
        if self.is_shut_down() {
            return None;
        }
        let stats = self.ctx.stats();
        let size = match io.size() {
            Ok(size) => size,
            Err(e) => {
                log::warn!("Cannot stat {}, not caching: {}", io.path(), e);
                stats.record_attach_failure();
                return None;
            }
        };
        if !self.decisions.decide(&DecisionTarget::new(io.path(), Some(size))) {
            stats.record_rejected();
            return None;
        }
        if !self.prepare(io.path()) {
            stats.record_attach_failure();
            return None;
        }

        let caching = if self.ctx.config().block_mode {
            let unit_size = self.ctx.config().block_mode_unit_size.get();
            CachingIo::units(Arc::clone(self), io, size, unit_size)
        } else {
            let storage = storage_path_for(io.path());
            match self.open_file(&io, storage, 0, size, size) {
                Ok(file) => CachingIo::whole(Arc::clone(self), io, size, file),
                Err(e) => {
                    log::warn!("Cannot open {} in the cache: {}", io.path(), e);
                    stats.record_attach_failure();
                    return None;
                }
            }
        };
        let attached = self.attached.fetch_add(1, Ordering::AcqRel) + 1;
        stats.record_attach();
        log::debug!("Attached {} ({} live attachments)", caching.path(), attached);
        Some(caching)
    }

    /// Release a caching handle; same as dropping it
    pub fn detach(&self, io: CachingIo) {
        drop(io);
    }

    /// Number of live caching handles
    pub fn is_attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    pub fn open_file_count(&self) -> usize {
        self.open.len()
    }

    /// Open (or share) the cached file stored at `storage_path`
    pub(crate) fn open_file(
        &self,
        remote: &Arc<dyn RemoteIo>,
        storage_path: String,
        origin_offset: u64,
        size: u64,
        origin_size: u64,
    ) -> Result<Arc<CachedFile>, CacheOperationError> {
        if self.is_shut_down() {
            return Err(CacheOperationError::ShutDown);
        }
        match self.open.entry(storage_path) {
            Entry::Occupied(mut entry) => {
                let open = entry.get_mut();
                open.attachments += 1;
                Ok(Arc::clone(&open.file))
            }
            Entry::Vacant(entry) => {
                let id = FileId(self.next_file_id.fetch_add(1, Ordering::Relaxed));
                let file = CachedFile::open(
                    Arc::clone(&self.ctx),
                    id,
                    Arc::clone(remote),
                    entry.key().clone(),
                    origin_offset,
                    size,
                    origin_size,
                );
                entry.insert(OpenFile {
                    file: Arc::clone(&file),
                    attachments: 1,
                });
                Ok(file)
            }
        }
    }

    /// Drop one attachment of a cached file; the last one tears it down
    pub(crate) fn release_file(&self, storage_path: &str) {
        match self.open.entry(storage_path.to_string()) {
            Entry::Occupied(mut entry) => {
                let open = entry.get_mut();
                open.attachments -= 1;
                if open.attachments == 0 {
                    // the entry stays held until the info record is stored,
                    // so purge cannot remove the file under the teardown
                    open.file.teardown();
                    entry.remove();
                }
            }
            Entry::Vacant(_) => {
                log::error!("Release of {} which is not open", storage_path);
            }
        }
    }

    pub(crate) fn release_attachment(&self, path: &str) {
        let previous = self.attached.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "detach without attach");
        self.ctx.stats().record_detach();
        log::debug!("Detached {} ({} live attachments)", path, previous.saturating_sub(1));
    }

    /// Run one purge pass now, outside the periodic schedule
    pub fn purge_now(&self) -> Result<PurgeReport, CacheOperationError> {
        let guard = self.eviction_guard();
        self.purge
            .cache_dir_cleanup(self.ctx.backend().as_ref(), guard.as_ref())
    }

    pub fn stats(&self) -> ProxyCacheStats {
        ProxyCacheStats {
            cache: self.ctx.stats().snapshot(),
            ram: self.ctx.pool().stats(),
            write_queue: self.ctx.queue().stats(),
            purge: self.purge.stats(),
            attached: self.is_attached(),
            open_files: self.open.len(),
            prefetch_files: self.ctx.registry().len(),
        }
    }

    /// Stop background threads. Queued writes are drained before the
    /// writers exit; later reads are served without caching new blocks.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Shutting down cache ({} live attachments)", self.is_attached());
        let mut workers = std::mem::take(&mut *lock(&self.workers));
        if let Some(mut prefetch) = workers.prefetch.take() {
            prefetch.stop();
        }
        if let Some(mut purge) = workers.purge.take() {
            purge.stop();
        }
        if let Some(mut writers) = workers.writers.take() {
            writers.stop();
        }
        log::info!("Cache shut down");
    }
}

impl Drop for CacheCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("context", &self.ctx)
            .field("decisions", &self.decisions)
            .field("attached", &self.is_attached())
            .field("open_files", &self.open.len())
            .finish()
    }
}
