//! Write queue counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Lock-free counters updated by producers and writers
#[derive(Debug, Default)]
pub struct WriteQueueStats {
    pub(crate) enqueued_from_read: CachePadded<AtomicU64>,
    pub(crate) enqueued_from_prefetch: CachePadded<AtomicU64>,
    pub(crate) written: CachePadded<AtomicU64>,
    pub(crate) failed: CachePadded<AtomicU64>,
    pub(crate) withdrawn: CachePadded<AtomicU64>,
    pub(crate) bytes_written: CachePadded<AtomicU64>,
    /// Cumulative time spent inside backend writes
    pub(crate) write_time_ns: CachePadded<AtomicU64>,
}

impl WriteQueueStats {
    pub(crate) fn record_enqueue(&self, from_read: bool) {
        if from_read {
            self.enqueued_from_read.fetch_add(1, Ordering::Relaxed);
        } else {
            self.enqueued_from_prefetch.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_written(&self, bytes: u64, elapsed_ns: u64) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.write_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_withdrawn(&self, count: u64) {
        self.withdrawn.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot of the counters plus the current queue occupancy
    pub fn snapshot(&self, queued_blocks: usize, queued_bytes: u64) -> WriteQueueStatsSnapshot {
        let written = self.written.load(Ordering::Relaxed);
        let write_time_ns = self.write_time_ns.load(Ordering::Relaxed);
        WriteQueueStatsSnapshot {
            queued_blocks,
            queued_bytes,
            enqueued_from_read: self.enqueued_from_read.load(Ordering::Relaxed),
            enqueued_from_prefetch: self.enqueued_from_prefetch.load(Ordering::Relaxed),
            written,
            failed: self.failed.load(Ordering::Relaxed),
            withdrawn: self.withdrawn.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            avg_write_time_ns: if written > 0 { write_time_ns / written } else { 0 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteQueueStatsSnapshot {
    pub queued_blocks: usize,
    pub queued_bytes: u64,
    pub enqueued_from_read: u64,
    pub enqueued_from_prefetch: u64,
    pub written: u64,
    pub failed: u64,
    pub withdrawn: u64,
    pub bytes_written: u64,
    pub avg_write_time_ns: u64,
}
