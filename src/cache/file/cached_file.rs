//! A remote file (or one block-mode unit of it) being cached
//!
//! Each block of the file is `Missing`, being loaded, held in RAM while its
//! write is queued, or on disk. Reads are served from RAM or disk when
//! possible; a missing block is fetched into a fresh RAM buffer and queued
//! for writing, unless RAM or the write queue is exhausted, in which case
//! the range is read straight from the remote without caching.

use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use super::info::{block_count, block_len, FileInfo};
use crate::cache::block::{Block, BlockOrigin, WriteState};
use crate::cache::coordinator::CacheContext;
use crate::cache::memory::RamReservation;
use crate::cache::remote::{read_full, RemoteIo};
use crate::cache::sync_wrapper::{lock, wait_timeout};
use crate::cache::traits::{
    BlockSink, CacheOperationError, FileId, PrefetchOutcome, PrefetchSource,
};

/// Longest a reader waits for another thread loading the same block
const LOADING_WAIT: Duration = Duration::from_secs(2);

enum Slot {
    Missing,
    /// Being filled by a reader or the prefetcher
    Loading,
    InRam(Arc<Block>),
    OnDisk,
}

struct FileState {
    slots: Vec<Slot>,
    info: FileInfo,
    prefetch_cursor: usize,
    prefetch_in_flight: usize,
    torn_down: bool,
}

impl FileState {
    fn has_missing(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, Slot::Missing))
    }

    fn fully_on_disk(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::OnDisk))
    }
}

pub struct CachedFile {
    id: FileId,
    /// Logical path inside the disk store
    storage_path: String,
    /// Position of this file's first byte in the remote file
    origin_offset: u64,
    size: u64,
    remote: Arc<dyn RemoteIo>,
    ctx: Arc<CacheContext>,
    state: Mutex<FileState>,
    /// Signalled whenever a slot leaves `Loading`
    loaded: Condvar,
    this: Weak<CachedFile>,
}

impl CachedFile {
    /// Open a cached file, reusing blocks a previous session left on disk
    pub(crate) fn open(
        ctx: Arc<CacheContext>,
        id: FileId,
        remote: Arc<dyn RemoteIo>,
        storage_path: String,
        origin_offset: u64,
        size: u64,
        origin_size: u64,
    ) -> Arc<Self> {
        let buffer_size = ctx.buffer_size();
        let mut info = match load_info(&ctx, &storage_path) {
            Some(info) if info.matches(size, buffer_size) && info.origin_size() == origin_size => {
                info
            }
            Some(_) => {
                log::warn!(
                    "Info record of {} does not match the remote file, starting over",
                    storage_path
                );
                FileInfo::new(size, origin_size, buffer_size)
            }
            None => FileInfo::new(size, origin_size, buffer_size),
        };
        info.record_access(SystemTime::now());
        if let Err(e) = ctx.backend().touch(&storage_path) {
            log::trace!("No stored data to touch for {}: {}", storage_path, e);
        }

        let slots = (0..block_count(size, buffer_size))
            .map(|i| {
                if info.is_downloaded(i) {
                    Slot::OnDisk
                } else {
                    Slot::Missing
                }
            })
            .collect::<Vec<_>>();
        log::debug!(
            "Opened {} as {} ({} of {} blocks on disk)",
            storage_path,
            id,
            info.downloaded_blocks(),
            slots.len()
        );

        let file = Arc::new_cyclic(|this| Self {
            id,
            storage_path,
            origin_offset,
            size,
            remote,
            ctx,
            state: Mutex::new(FileState {
                slots,
                info,
                prefetch_cursor: 0,
                prefetch_in_flight: 0,
                torn_down: false,
            }),
            loaded: Condvar::new(),
            this: this.clone(),
        });
        file.register_for_prefetch_if_needed();
        file
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Blocks currently on disk
    pub fn blocks_on_disk(&self) -> usize {
        let state = lock(&self.state);
        state
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::OnDisk))
            .count()
    }

    pub fn num_blocks(&self) -> usize {
        lock(&self.state).slots.len()
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).fully_on_disk()
    }

    /// Copy of the current info record
    pub fn info(&self) -> FileInfo {
        lock(&self.state).info.clone()
    }

    /// Read `buf.len()` bytes at `offset`, short only at end of file
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, CacheOperationError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let end = self.size.min(offset + buf.len() as u64);
        let buffer_size = self.ctx.buffer_size();
        let mut pos = offset;
        while pos < end {
            let index = pos / buffer_size;
            let block_start = index * buffer_size;
            let chunk_end = end.min(block_start + buffer_size);
            let dst = &mut buf[(pos - offset) as usize..(chunk_end - offset) as usize];
            self.read_block_range(index as usize, (pos - block_start) as usize, dst)?;
            pos = chunk_end;
        }
        Ok((end - offset) as usize)
    }

    fn read_block_range(
        &self,
        index: usize,
        inner: usize,
        dst: &mut [u8],
    ) -> Result<(), CacheOperationError> {
        let deadline = Instant::now() + LOADING_WAIT;
        let mut state = lock(&self.state);
        loop {
            match &state.slots[index] {
                Slot::InRam(block) => {
                    let block = Arc::clone(block);
                    drop(state);
                    if block.copy_out(inner, dst) == Some(dst.len()) {
                        self.ctx.stats().record_ram_hit(dst.len() as u64);
                        return Ok(());
                    }
                    // buffer already released; only a completed write is on disk
                    if block.write_state() == WriteState::Written {
                        return self.read_from_disk(index, inner, dst);
                    }
                    return self.read_uncached(index, inner, dst);
                }
                Slot::OnDisk => {
                    drop(state);
                    return self.read_from_disk(index, inner, dst);
                }
                Slot::Loading => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(state);
                        return self.read_uncached(index, inner, dst);
                    }
                    state = wait_timeout(&self.loaded, state, deadline - now).0;
                }
                Slot::Missing => break,
            }
        }

        if state.torn_down || !self.ctx.queue().have_free_writing_slots() {
            drop(state);
            return self.read_uncached(index, inner, dst);
        }
        let Some(reservation) = self.ctx.pool().try_reserve() else {
            drop(state);
            return self.read_uncached(index, inner, dst);
        };
        state.slots[index] = Slot::Loading;
        drop(state);

        let block = self.new_block(index, BlockOrigin::Read, reservation);
        if let Err(e) = self.fill_block(&block) {
            self.abandon_load(index);
            return Err(e);
        }
        if block.copy_out(inner, dst) != Some(dst.len()) {
            self.abandon_load(index);
            return Err(CacheOperationError::invalid_state(format!(
                "block {} of {} lost its buffer while loading",
                index, self.storage_path
            )));
        }
        self.ctx.stats().record_fetch(dst.len() as u64);
        self.submit(index, block);
        Ok(())
    }

    fn read_from_disk(
        &self,
        index: usize,
        inner: usize,
        dst: &mut [u8],
    ) -> Result<(), CacheOperationError> {
        let offset = index as u64 * self.ctx.buffer_size() + inner as u64;
        match self.ctx.backend().read_block(&self.storage_path, offset, dst) {
            Ok(n) if n == dst.len() => {
                self.ctx.stats().record_disk_hit(n as u64);
                return Ok(());
            }
            Ok(n) => log::warn!(
                "Short disk read of block {} of {} ({} of {} bytes)",
                index,
                self.storage_path,
                n,
                dst.len()
            ),
            Err(e) => log::warn!(
                "Disk read of block {} of {} failed: {}",
                index,
                self.storage_path,
                e
            ),
        }
        self.ctx.stats().record_disk_read_error();
        self.forget_block(index);
        self.read_uncached(index, inner, dst)
    }

    /// Serve a range directly from the remote, bypassing the cache
    fn read_uncached(
        &self,
        index: usize,
        inner: usize,
        dst: &mut [u8],
    ) -> Result<(), CacheOperationError> {
        let offset = self.origin_offset + index as u64 * self.ctx.buffer_size() + inner as u64;
        let n = read_full(self.remote.as_ref(), offset, dst)?;
        if n != dst.len() {
            return Err(CacheOperationError::remote_failed(format!(
                "short read of {} at {}: {} of {} bytes",
                self.remote.path(),
                offset,
                n,
                dst.len()
            )));
        }
        self.ctx.stats().record_bypass(n as u64);
        Ok(())
    }

    fn new_block(
        &self,
        index: usize,
        origin: BlockOrigin,
        reservation: RamReservation,
    ) -> Arc<Block> {
        let buffer_size = self.ctx.buffer_size();
        let len = block_len(index as u64, self.size, buffer_size) as usize;
        let sink: Weak<dyn BlockSink> = self.this.clone();
        Block::new(
            self.id,
            self.storage_path.as_str(),
            index as u64,
            index as u64 * buffer_size,
            len,
            origin,
            reservation,
            sink,
        )
    }

    fn fill_block(&self, block: &Arc<Block>) -> Result<(), CacheOperationError> {
        let remote_offset = self.origin_offset + block.offset();
        block.fill(|data| {
            let n = read_full(self.remote.as_ref(), remote_offset, data)?;
            if n != data.len() {
                return Err(CacheOperationError::remote_failed(format!(
                    "short read of {} at {}: {} of {} bytes",
                    self.remote.path(),
                    remote_offset,
                    n,
                    data.len()
                )));
            }
            Ok(())
        })
    }

    /// Hand a filled block to the write queue, or drop it if the file is
    /// being torn down or the queue is shut
    fn submit(&self, index: usize, block: Arc<Block>) -> bool {
        let from_read = block.origin() == BlockOrigin::Read;
        let mut state = lock(&self.state);
        // the queue is entered under the file lock so teardown's withdrawal
        // cannot slip between the check and the add
        let accepted =
            !state.torn_down && self.ctx.queue().add_write_task(Arc::clone(&block), from_read);
        if accepted {
            state.slots[index] = Slot::InRam(Arc::clone(&block));
            if !from_read {
                state.prefetch_in_flight += 1;
            }
        } else {
            state.slots[index] = Slot::Missing;
        }
        drop(state);
        if !accepted {
            block.release_buffer();
        }
        self.loaded.notify_all();
        accepted
    }

    fn abandon_load(&self, index: usize) {
        lock(&self.state).slots[index] = Slot::Missing;
        self.loaded.notify_all();
    }

    /// Mark a block as no longer cached after its stored copy proved unreadable
    fn forget_block(&self, index: usize) {
        {
            let mut state = lock(&self.state);
            if matches!(state.slots[index], Slot::OnDisk | Slot::InRam(_)) {
                state.slots[index] = Slot::Missing;
                state.info.clear_downloaded(index as u64);
            }
        }
        self.register_for_prefetch_if_needed();
    }

    fn register_for_prefetch_if_needed(&self) {
        if !self.ctx.config().prefetch_enabled {
            return;
        }
        let wanted = {
            let state = lock(&self.state);
            !state.torn_down && state.has_missing()
        };
        if !wanted {
            return;
        }
        if let Some(me) = self.this.upgrade() {
            let source: Arc<dyn PrefetchSource> = me;
            self.ctx.registry().register_prefetch_file(&source);
        }
    }

    /// Store the info record. Skipped while nothing was downloaded and no
    /// write is still in flight.
    fn persist_info(&self) {
        let encoded = {
            let state = lock(&self.state);
            let in_flight = state.slots.iter().any(|s| matches!(s, Slot::InRam(_)));
            if state.info.downloaded_blocks() == 0 && !in_flight {
                return;
            }
            state.info.encode()
        };
        let result = encoded.and_then(|record| {
            self.ctx.backend().write_info(&self.storage_path, &record)
        });
        if let Err(e) = result {
            log::warn!("Could not store info record of {}: {}", self.storage_path, e);
        }
    }

    /// Mark a block whose write finished after teardown in the stored
    /// record. A missing record means purge removed the file meanwhile, and
    /// it stays missing.
    fn record_late_block(&self, index: usize) {
        let _records = self.ctx.lock_records();
        let stored = match self.ctx.backend().read_info(&self.storage_path) {
            Ok(Some(bytes)) => FileInfo::decode(&bytes).ok(),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Could not load info record of {}: {}", self.storage_path, e);
                None
            }
        };
        let Some(mut info) = stored.filter(|info| info.matches(self.size, self.ctx.buffer_size()))
        else {
            log::debug!(
                "No stored record of {} for late block {}",
                self.storage_path,
                index
            );
            return;
        };
        info.set_downloaded(index as u64);
        let result = info
            .encode()
            .and_then(|record| self.ctx.backend().write_info(&self.storage_path, &record));
        if let Err(e) = result {
            log::warn!("Could not store info record of {}: {}", self.storage_path, e);
        }
    }

    /// Withdraw everything this file still has queued and store its info.
    ///
    /// After this returns the write queue holds no entry owned by the file
    /// and the prefetch scheduler no longer sees it.
    pub(crate) fn teardown(&self) {
        {
            let mut state = lock(&self.state);
            if state.torn_down {
                return;
            }
            state.torn_down = true;
        }
        self.ctx.registry().deregister_prefetch_file(self.id);
        let withdrawn = self.ctx.queue().remove_write_q_entries_for(self.id);
        {
            let mut state = lock(&self.state);
            for slot in state.slots.iter_mut() {
                let withdrawn = matches!(
                    slot,
                    Slot::InRam(block) if block.write_state() == WriteState::Withdrawn
                );
                if withdrawn {
                    *slot = Slot::Missing;
                }
            }
        }
        self.persist_info();
        self.loaded.notify_all();
        log::debug!(
            "Tore down {} ({}), {} queued write(s) withdrawn",
            self.storage_path,
            self.id,
            withdrawn
        );
    }
}

fn load_info(ctx: &CacheContext, storage_path: &str) -> Option<FileInfo> {
    match ctx.backend().read_info(storage_path) {
        Ok(Some(bytes)) => match FileInfo::decode(&bytes) {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("Ignoring unreadable info record of {}: {}", storage_path, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            log::warn!("Could not load info record of {}: {}", storage_path, e);
            None
        }
    }
}

impl BlockSink for CachedFile {
    fn write_completed(&self, block: &Arc<Block>, result: Result<(), CacheOperationError>) {
        let index = block.index() as usize;
        let (became_complete, lost_block, late) = {
            let mut state = lock(&self.state);
            if block.origin() == BlockOrigin::Prefetch {
                state.prefetch_in_flight = state.prefetch_in_flight.saturating_sub(1);
            }
            let current =
                matches!(state.slots.get(index), Some(Slot::InRam(b)) if Arc::ptr_eq(b, block));
            match &result {
                Ok(()) if current => {
                    state.slots[index] = Slot::OnDisk;
                    state.info.set_downloaded(index as u64);
                }
                Ok(()) => {}
                Err(e) => {
                    log::warn!(
                        "Write of block {} of {} failed: {}",
                        index,
                        self.storage_path,
                        e
                    );
                    self.ctx.stats().record_write_failure();
                    if current {
                        state.slots[index] = Slot::Missing;
                    }
                }
            }
            (
                result.is_ok() && current && !state.torn_down && state.fully_on_disk(),
                result.is_err() && current,
                result.is_ok() && current && state.torn_down,
            )
        };
        self.loaded.notify_all();

        if became_complete {
            log::debug!("{} is fully cached", self.storage_path);
            self.ctx.registry().deregister_prefetch_file(self.id);
            self.persist_info();
        } else if lost_block {
            self.register_for_prefetch_if_needed();
        } else if late {
            self.record_late_block(index);
        }
    }
}

impl PrefetchSource for CachedFile {
    fn file_id(&self) -> FileId {
        self.id
    }

    fn prefetch_blocks_in_flight(&self) -> usize {
        lock(&self.state).prefetch_in_flight
    }

    fn prefetch_block(&self, reservation: RamReservation) -> PrefetchOutcome {
        let index = {
            let mut state = lock(&self.state);
            if state.torn_down {
                return PrefetchOutcome::Complete;
            }
            let count = state.slots.len();
            let start = state.prefetch_cursor;
            let found = (0..count)
                .map(|k| (start + k) % count)
                .find(|&i| matches!(state.slots[i], Slot::Missing));
            match found {
                Some(index) => {
                    state.slots[index] = Slot::Loading;
                    state.prefetch_cursor = index + 1;
                    index
                }
                None => {
                    let pending = state
                        .slots
                        .iter()
                        .any(|s| matches!(s, Slot::Loading | Slot::InRam(_)));
                    drop(state);
                    if pending {
                        return PrefetchOutcome::Busy;
                    }
                    self.ctx.registry().deregister_prefetch_file(self.id);
                    return PrefetchOutcome::Complete;
                }
            }
        };

        let block = self.new_block(index, BlockOrigin::Prefetch, reservation);
        if let Err(e) = self.fill_block(&block) {
            log::debug!(
                "Prefetch of block {} of {} failed: {}",
                index,
                self.storage_path,
                e
            );
            self.abandon_load(index);
            return PrefetchOutcome::Busy;
        }
        if self.submit(index, block) {
            self.ctx.stats().record_prefetch();
            PrefetchOutcome::Issued
        } else {
            PrefetchOutcome::Busy
        }
    }
}

impl std::fmt::Debug for CachedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFile")
            .field("id", &self.id)
            .field("storage_path", &self.storage_path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::{ByteSize, CacheConfig};
    use crate::cache::remote::MemoryRemoteIo;
    use crate::cache::storage::{DiskBackend, MemoryDiskBackend};
    use crate::cache::write_queue::WriteOutcome;
    use std::thread;

    const BS: usize = 1024;

    fn context(buffers: usize, prefetch: bool) -> (Arc<CacheContext>, Arc<MemoryDiskBackend>) {
        let backend = Arc::new(MemoryDiskBackend::default());
        let config = CacheConfig {
            buffer_size: ByteSize(BS as u64),
            num_ram_buffers: Some(buffers),
            prefetch_enabled: prefetch,
            ..Default::default()
        };
        let ctx = CacheContext::new(config, backend.clone() as Arc<dyn DiskBackend>).unwrap();
        (ctx, backend)
    }

    fn remote(len: usize) -> Arc<MemoryRemoteIo> {
        Arc::new(MemoryRemoteIo::new("/r/file", (0..len).map(|i| (i % 251) as u8).collect()))
    }

    fn open(ctx: &Arc<CacheContext>, remote: &Arc<MemoryRemoteIo>, id: u64) -> Arc<CachedFile> {
        let size = remote.size().unwrap();
        CachedFile::open(
            Arc::clone(ctx),
            FileId(id),
            remote.clone(),
            "/r/file".to_string(),
            0,
            size,
            size,
        )
    }

    fn drain(ctx: &CacheContext, backend: &MemoryDiskBackend) -> usize {
        let mut n = 0;
        while ctx
            .queue()
            .process_next(backend, Some(Duration::from_millis(1)))
            .is_some()
        {
            n += 1;
        }
        n
    }

    #[test]
    fn test_miss_then_ram_then_disk() {
        let (ctx, backend) = context(4, false);
        let remote = remote(2500);
        let file = open(&ctx, &remote, 1);

        let mut buf = vec![0u8; 2500];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 2500);
        assert_eq!(buf[1500], (1500 % 251) as u8);
        assert_eq!(ctx.queue().len(), 3);
        assert_eq!(ctx.pool().used(), 3);

        let reads_after_fetch = remote.reads();
        let mut part = [0u8; 100];
        assert_eq!(file.read_at(2000, &mut part).unwrap(), 100);
        assert_eq!(ctx.stats().snapshot().bytes_from_ram, 100);

        assert_eq!(drain(&ctx, &backend), 3);
        assert_eq!(ctx.pool().used(), 0);
        assert!(file.is_complete());

        let mut again = vec![0u8; 2500];
        assert_eq!(file.read_at(0, &mut again).unwrap(), 2500);
        assert_eq!(again, buf);
        assert_eq!(remote.reads(), reads_after_fetch);
        assert_eq!(ctx.stats().snapshot().bytes_from_disk, 2500);
    }

    #[test]
    fn test_ram_pressure_falls_back_to_uncached_read() {
        let (ctx, _backend) = context(1, false);
        let remote = remote(2 * BS);
        let file = open(&ctx, &remote, 1);

        let mut buf = vec![0u8; 2 * BS];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 2 * BS);
        assert_eq!(buf[BS + 7], ((BS + 7) % 251) as u8);

        let stats = ctx.stats().snapshot();
        assert_eq!(stats.bytes_fetched, BS as u64);
        assert_eq!(stats.bytes_bypassed, BS as u64);
        assert_eq!(ctx.pool().used(), 1);
    }

    #[test]
    fn test_teardown_withdraws_queued_writes() {
        let (ctx, _backend) = context(4, false);
        let remote = remote(3 * BS);
        let file = open(&ctx, &remote, 7);

        let mut buf = vec![0u8; 3 * BS];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(ctx.queue().entries_for(FileId(7)), 3);

        file.teardown();
        assert_eq!(ctx.queue().entries_for(FileId(7)), 0);
        assert_eq!(ctx.pool().used(), 0);
        assert_eq!(file.blocks_on_disk(), 0);

        // still readable, just uncached
        let mut tail = [0u8; 10];
        assert_eq!(file.read_at(3 * BS as u64 - 10, &mut tail).unwrap(), 10);
        assert_eq!(ctx.queue().len(), 0);
    }

    #[test]
    fn test_reopened_file_reuses_disk_blocks() {
        let (ctx, backend) = context(4, false);
        let remote = remote(2500);
        let file = open(&ctx, &remote, 1);
        let mut buf = vec![0u8; 2500];
        file.read_at(0, &mut buf).unwrap();
        drain(&ctx, &backend);
        file.teardown();
        drop(file);

        let reads = remote.reads();
        let reopened = open(&ctx, &remote, 2);
        assert_eq!(reopened.blocks_on_disk(), 3);
        assert_eq!(reopened.info().access_count(), 2);
        let mut again = vec![0u8; 2500];
        reopened.read_at(0, &mut again).unwrap();
        assert_eq!(again, buf);
        assert_eq!(remote.reads(), reads);
    }

    #[test]
    fn test_failed_write_releases_ram_and_refetches() {
        let (ctx, backend) = context(4, false);
        backend.set_fail_writes(true);
        let remote = remote(BS);
        let file = open(&ctx, &remote, 1);

        let mut buf = vec![0u8; BS];
        file.read_at(0, &mut buf).unwrap();
        let outcome = ctx
            .queue()
            .process_next(backend.as_ref(), Some(Duration::from_millis(10)))
            .unwrap();
        assert!(outcome.result.is_err());
        assert_eq!(ctx.pool().used(), 0);
        assert_eq!(ctx.stats().snapshot().write_failures, 1);
        assert_eq!(file.blocks_on_disk(), 0);

        backend.set_fail_writes(false);
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(drain(&ctx, &backend), 1);
        assert!(file.is_complete());
    }

    #[test]
    fn test_prefetch_fills_every_block_then_completes() {
        let (ctx, backend) = context(8, true);
        let remote = remote(3 * BS);
        let file = open(&ctx, &remote, 3);
        assert!(ctx.registry().is_registered(FileId(3)));

        for _ in 0..3 {
            let reservation = ctx.pool().try_reserve().unwrap();
            assert_eq!(file.prefetch_block(reservation), PrefetchOutcome::Issued);
        }
        assert_eq!(file.prefetch_blocks_in_flight(), 3);
        let reservation = ctx.pool().try_reserve().unwrap();
        assert_eq!(file.prefetch_block(reservation), PrefetchOutcome::Busy);

        drain(&ctx, &backend);
        assert_eq!(file.prefetch_blocks_in_flight(), 0);
        assert!(file.is_complete());
        assert!(!ctx.registry().is_registered(FileId(3)));

        let reservation = ctx.pool().try_reserve().unwrap();
        assert_eq!(file.prefetch_block(reservation), PrefetchOutcome::Complete);
        assert_eq!(ctx.pool().used(), 0);
        assert_eq!(ctx.stats().snapshot().blocks_prefetched, 3);
    }

    /// Read the first block, let a slow writer pop it, then tear the file
    /// down while the write is still running
    fn teardown_during_write(
        ctx: &Arc<CacheContext>,
        backend: &Arc<MemoryDiskBackend>,
        file: &Arc<CachedFile>,
    ) -> thread::JoinHandle<Option<WriteOutcome>> {
        backend.set_write_delay(Duration::from_millis(100));
        let mut buf = vec![0u8; BS];
        file.read_at(0, &mut buf).unwrap();

        let writer = {
            let ctx = Arc::clone(ctx);
            let backend = Arc::clone(backend);
            thread::spawn(move || {
                ctx.queue()
                    .process_next(backend.as_ref(), Some(Duration::from_secs(1)))
            })
        };
        while !ctx.queue().is_empty() {
            thread::yield_now();
        }
        file.teardown();
        writer
    }

    #[test]
    fn test_write_finishing_after_teardown_is_recorded() {
        let (ctx, backend) = context(4, false);
        let remote = remote(2 * BS);
        let file = open(&ctx, &remote, 1);

        let writer = teardown_during_write(&ctx, &backend, &file);
        assert!(writer.join().unwrap().unwrap().result.is_ok());

        let stored = backend.read_info("/r/file").unwrap().unwrap();
        let info = FileInfo::decode(&stored).unwrap();
        assert!(info.is_downloaded(0));
        assert!(!info.is_downloaded(1));
        assert_eq!(ctx.pool().used(), 0);
    }

    #[test]
    fn test_late_write_does_not_restore_a_purged_record() {
        let (ctx, backend) = context(4, false);
        let remote = remote(2 * BS);
        let file = open(&ctx, &remote, 1);

        let writer = teardown_during_write(&ctx, &backend, &file);
        backend.remove("/r/file").unwrap();
        assert!(writer.join().unwrap().unwrap().result.is_ok());

        assert!(backend.read_info("/r/file").unwrap().is_none());
    }
}
