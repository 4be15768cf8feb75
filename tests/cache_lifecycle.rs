//! End-to-end attach/read/detach through `ProxyCache`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{unbounded, Receiver, Sender};
use proxycache::cache::storage::DiskUsage;
use proxycache::prelude::*;

const BS: usize = 4096;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn read_all(io: &CachingIo, chunk: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(io.size() as usize);
    let mut buf = vec![0u8; chunk];
    loop {
        let n = io.read_at(out.len() as u64, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn is_complete(cache: &ProxyCache, path: &str) -> bool {
    cache.stat(path).is_some_and(|stat| stat.complete)
}

#[test]
fn first_read_fetches_and_second_read_hits_locally() {
    let backend = Arc::new(MemoryDiskBackend::default());
    let cache = ProxyCache::builder()
        .buffer_size(BS as u64)
        .ram_buffers(8)
        .backend(backend.clone())
        .build()
        .unwrap();
    let data = pattern(5 * BS + 100);
    let remote = Arc::new(MemoryRemoteIo::new("/data/a.bin", data.clone()));

    let io = cache.attach(remote.clone()).unwrap();
    assert_eq!(io.size(), data.len() as u64);
    assert_eq!(read_all(&io, 3000), data);
    assert_eq!(remote.bytes_read(), data.len() as u64);

    assert!(wait_until(|| is_complete(&cache, "/data/a.bin")));
    assert!(wait_until(|| cache.stats().ram.used == 0));

    let before = cache.stats().cache;
    assert_eq!(read_all(&io, 7000), data);
    let delta = cache.stats().cache.since(&before);
    assert_eq!(remote.bytes_read(), data.len() as u64);
    assert_eq!(delta.bytes_hit(), data.len() as u64);
    assert_eq!(delta.bytes_fetched, 0);

    cache.detach(io);
    assert_eq!(cache.is_attached(), 0);
    assert_eq!(cache.stats().open_files, 0);
    assert_eq!(backend.file_data("/data/a.bin").unwrap(), data);
}

#[test]
fn cached_state_survives_restart_on_local_disk() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(3 * BS);
    let build = || {
        ProxyCache::builder()
            .cache_dir(dir.path())
            .buffer_size(BS as u64)
            .ram_buffers(4)
            .build()
            .unwrap()
    };

    {
        let cache = build();
        let remote = Arc::new(MemoryRemoteIo::new("/srv/file", data.clone()));
        let io = cache.attach(remote).unwrap();
        assert_eq!(read_all(&io, BS), data);
        assert!(wait_until(|| is_complete(&cache, "/srv/file")));
        io.detach();
        cache.shutdown();
    }

    let cache = build();
    let stat = cache.stat("/srv/file").unwrap();
    assert!(stat.complete);
    assert_eq!(stat.cached_bytes, data.len() as u64);
    assert!(stat.access_count >= 1);

    let remote = Arc::new(MemoryRemoteIo::new("/srv/file", data.clone()));
    let io = cache.attach(remote.clone()).unwrap();
    assert_eq!(read_all(&io, 1000), data);
    assert_eq!(remote.reads(), 0);
}

#[test]
fn block_mode_stores_independent_units() {
    let backend = Arc::new(MemoryDiskBackend::default());
    let cache = ProxyCache::builder()
        .buffer_size(BS as u64)
        .ram_buffers(8)
        .block_mode(2 * BS as u64)
        .backend(backend.clone())
        .build()
        .unwrap();
    let data = pattern(5 * BS);
    let remote = Arc::new(MemoryRemoteIo::new("/bm/f", data.clone()));

    let io = cache.attach(remote).unwrap();
    assert!(io.open_files().is_empty());
    assert_eq!(read_all(&io, 3 * BS), data);
    assert_eq!(io.open_files().len(), 3);
    assert_eq!(cache.stats().open_files, 3);

    assert!(wait_until(|| is_complete(&cache, "/bm/f")));
    let stat = cache.stat("/bm/f").unwrap();
    assert_eq!(stat.size, data.len() as u64);
    assert_eq!(stat.cached_bytes, data.len() as u64);

    let unit = 2 * BS;
    for offset in [0, unit, 2 * unit] {
        let path = format!("/bm/f___{}_{}", unit, offset);
        let end = (offset + unit).min(data.len());
        assert_eq!(backend.file_data(&path).unwrap(), &data[offset..end]);
    }

    drop(io);
    assert_eq!(cache.stats().open_files, 0);
}

#[test]
fn prefetch_fills_an_idle_attached_file() {
    let cache = ProxyCache::builder()
        .buffer_size(BS as u64)
        .ram_buffers(4)
        .prefetch(2)
        .backend(Arc::new(MemoryDiskBackend::default()))
        .build()
        .unwrap();
    let data = pattern(6 * BS);
    let remote = Arc::new(MemoryRemoteIo::new("/pf/file", data.clone()));

    let io = cache.attach(remote.clone()).unwrap();
    assert!(wait_until(|| is_complete(&cache, "/pf/file")));
    assert!(wait_until(|| cache.stats().prefetch_files == 0));
    assert_eq!(cache.stats().cache.blocks_prefetched, 6);

    let fetched = remote.bytes_read();
    let before = cache.stats().cache;
    assert_eq!(read_all(&io, BS), data);
    assert_eq!(remote.bytes_read(), fetched);
    assert_eq!(cache.stats().cache.since(&before).bytes_fetched, 0);
}

#[test]
fn rejected_files_are_not_attached() {
    let cache = ProxyCache::builder()
        .backend(Arc::new(MemoryDiskBackend::default()))
        .decision(PathPatternDecision::deny(r"\.tmp$").unwrap())
        .decision(MinimumSizeDecision::new(16))
        .build()
        .unwrap();

    let scratch = Arc::new(MemoryRemoteIo::new("/x/scratch.tmp", vec![0; 1024]));
    let tiny = Arc::new(MemoryRemoteIo::new("/x/tiny", vec![0; 8]));
    assert!(cache.attach(scratch).is_none());
    assert!(cache.attach(tiny).is_none());

    let stats = cache.stats();
    assert_eq!(stats.cache.rejected, 2);
    assert_eq!(stats.attached, 0);
}

#[test]
fn purge_evicts_oldest_and_defers_attached_files() {
    let backend = Arc::new(MemoryDiskBackend::default());
    let epoch = SystemTime::UNIX_EPOCH;
    backend.insert_file("/old/x", 4000, epoch + Duration::from_secs(100));
    backend.insert_file("/old/y", 4000, epoch + Duration::from_secs(200));

    let cache = ProxyCache::builder()
        .buffer_size(BS as u64)
        .ram_buffers(4)
        .watermarks(2000, 10_000)
        .backend(backend.clone())
        .build()
        .unwrap();

    let remote = Arc::new(MemoryRemoteIo::new("/live/z", pattern(BS)));
    let io = cache.attach(remote).unwrap();
    read_all(&io, BS);
    assert!(wait_until(|| is_complete(&cache, "/live/z")));

    let report = cache.purge_now().unwrap();
    assert!(report.triggered);
    assert_eq!(report.evicted, vec!["/old/x".to_string(), "/old/y".to_string()]);
    assert_eq!(report.deferred, vec!["/live/z".to_string()]);
    assert!(backend.contains("/live/z"));

    drop(io);
    let report = cache.purge_now().unwrap();
    assert!(!report.triggered);
    assert!(report.occupancy_after < 10_000);
}

#[test]
fn shutdown_stops_attaching() {
    let cache = ProxyCache::builder()
        .backend(Arc::new(MemoryDiskBackend::default()))
        .build()
        .unwrap();
    cache.shutdown();
    cache.shutdown();
    let remote = Arc::new(MemoryRemoteIo::new("/late", vec![1; 100]));
    assert!(cache.attach(remote).is_none());
}

/// Store whose removals wait for a go-ahead
struct GatedRemoval {
    inner: MemoryDiskBackend,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl DiskBackend for GatedRemoval {
    fn write_block(&self, path: &str, offset: u64, data: &[u8]) -> Result<(), CacheOperationError> {
        self.inner.write_block(path, offset, data)
    }

    fn read_block(
        &self,
        path: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, CacheOperationError> {
        self.inner.read_block(path, offset, buf)
    }

    fn write_info(&self, path: &str, record: &[u8]) -> Result<(), CacheOperationError> {
        self.inner.write_info(path, record)
    }

    fn read_info(&self, path: &str) -> Result<Option<Vec<u8>>, CacheOperationError> {
        self.inner.read_info(path)
    }

    fn scan(&self) -> Result<DiskUsage, CacheOperationError> {
        self.inner.scan()
    }

    fn remove(&self, path: &str) -> Result<u64, CacheOperationError> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.inner.remove(path)
    }

    fn touch(&self, path: &str) -> Result<(), CacheOperationError> {
        self.inner.touch(path)
    }
}

#[test]
fn attach_racing_an_eviction_reads_correct_bytes() {
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let backend = Arc::new(GatedRemoval {
        inner: MemoryDiskBackend::default(),
        entered: entered_tx,
        release: release_rx,
    });
    let cache = ProxyCache::builder()
        .buffer_size(1024)
        .ram_buffers(4)
        .watermarks(0, 1)
        .purge_interval_secs(3600)
        .backend(backend)
        .build()
        .unwrap();
    let data: Vec<u8> = (1..=4096u32).map(|i| (i % 251) as u8).collect();
    let remote = Arc::new(MemoryRemoteIo::new("/f", data.clone()));

    let io = cache.attach(remote.clone()).unwrap();
    assert_eq!(read_all(&io, 1024), data);
    assert!(wait_until(|| is_complete(&cache, "/f")));
    io.detach();

    thread::scope(|s| {
        let purge = s.spawn(|| cache.purge_now().unwrap());
        entered_rx.recv().unwrap();
        let attach = s.spawn(|| cache.attach(remote.clone()).unwrap());
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        let report = purge.join().unwrap();
        assert_eq!(report.evicted, vec!["/f".to_string()]);
        assert!(report.deferred.is_empty());

        let io = attach.join().unwrap();
        let mut tail = vec![0u8; 1024];
        io.read_at(3072, &mut tail).unwrap();
        io.read_at(3072, &mut tail).unwrap();
        assert_eq!(tail, &data[3072..]);
        assert!(wait_until(|| cache.stats().write_queue.queued_blocks == 0));
        assert_eq!(read_all(&io, 1024), data);
    });
}

#[test]
fn block_mode_reads_after_shutdown_skip_the_cache() {
    let cache = ProxyCache::builder()
        .buffer_size(1024)
        .ram_buffers(8)
        .block_mode(2048)
        .backend(Arc::new(MemoryDiskBackend::default()))
        .build()
        .unwrap();
    let data = pattern(8192);
    let remote = Arc::new(MemoryRemoteIo::new("/bm/late", data.clone()));
    let io = cache.attach(remote).unwrap();

    let mut head = [0u8; 100];
    assert_eq!(io.read_at(0, &mut head).unwrap(), 100);
    cache.shutdown();

    let mut buf = vec![0u8; 1000];
    assert_eq!(io.read_at(6000, &mut buf).unwrap(), 1000);
    assert_eq!(buf, &data[6000..7000]);
    assert_eq!(io.read_at(0, &mut head).unwrap(), 100);
    assert_eq!(head, &data[..100]);
    assert_eq!(io.open_files().len(), 1);
}
