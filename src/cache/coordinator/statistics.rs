//! Cache-wide read and attach counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Counters shared by the coordinator and every open file
#[derive(Debug, Default)]
pub struct CacheStats {
    pub(crate) attaches: CachePadded<AtomicU64>,
    pub(crate) detaches: CachePadded<AtomicU64>,
    /// Attaches refused by the decision chain
    pub(crate) rejected: CachePadded<AtomicU64>,
    /// Attaches that failed on stat or prepare
    pub(crate) attach_failures: CachePadded<AtomicU64>,
    pub(crate) bytes_from_ram: CachePadded<AtomicU64>,
    pub(crate) bytes_from_disk: CachePadded<AtomicU64>,
    /// Bytes fetched from the remote and kept
    pub(crate) bytes_fetched: CachePadded<AtomicU64>,
    /// Bytes read from the remote without caching (RAM or queue pressure)
    pub(crate) bytes_bypassed: CachePadded<AtomicU64>,
    pub(crate) blocks_prefetched: CachePadded<AtomicU64>,
    pub(crate) write_failures: CachePadded<AtomicU64>,
    pub(crate) disk_read_errors: CachePadded<AtomicU64>,
}

#[inline]
fn bump(counter: &CachePadded<AtomicU64>, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl CacheStats {
    pub(crate) fn record_attach(&self) {
        bump(&self.attaches, 1);
    }

    pub(crate) fn record_detach(&self) {
        bump(&self.detaches, 1);
    }

    pub(crate) fn record_rejected(&self) {
        bump(&self.rejected, 1);
    }

    pub(crate) fn record_attach_failure(&self) {
        bump(&self.attach_failures, 1);
    }

    pub(crate) fn record_ram_hit(&self, bytes: u64) {
        bump(&self.bytes_from_ram, bytes);
    }

    pub(crate) fn record_disk_hit(&self, bytes: u64) {
        bump(&self.bytes_from_disk, bytes);
    }

    pub(crate) fn record_fetch(&self, bytes: u64) {
        bump(&self.bytes_fetched, bytes);
    }

    pub(crate) fn record_bypass(&self, bytes: u64) {
        bump(&self.bytes_bypassed, bytes);
    }

    pub(crate) fn record_prefetch(&self) {
        bump(&self.blocks_prefetched, 1);
    }

    pub(crate) fn record_write_failure(&self) {
        bump(&self.write_failures, 1);
    }

    pub(crate) fn record_disk_read_error(&self) {
        bump(&self.disk_read_errors, 1);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let load = |c: &CachePadded<AtomicU64>| c.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            attaches: load(&self.attaches),
            detaches: load(&self.detaches),
            rejected: load(&self.rejected),
            attach_failures: load(&self.attach_failures),
            bytes_from_ram: load(&self.bytes_from_ram),
            bytes_from_disk: load(&self.bytes_from_disk),
            bytes_fetched: load(&self.bytes_fetched),
            bytes_bypassed: load(&self.bytes_bypassed),
            blocks_prefetched: load(&self.blocks_prefetched),
            write_failures: load(&self.write_failures),
            disk_read_errors: load(&self.disk_read_errors),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub attaches: u64,
    pub detaches: u64,
    pub rejected: u64,
    pub attach_failures: u64,
    pub bytes_from_ram: u64,
    pub bytes_from_disk: u64,
    pub bytes_fetched: u64,
    pub bytes_bypassed: u64,
    pub blocks_prefetched: u64,
    pub write_failures: u64,
    pub disk_read_errors: u64,
}

impl CacheStatsSnapshot {
    /// Bytes served from RAM or disk
    pub fn bytes_hit(&self) -> u64 {
        self.bytes_from_ram + self.bytes_from_disk
    }

    /// Fraction of client bytes served locally
    pub fn hit_ratio(&self) -> f64 {
        let total = self.bytes_hit() + self.bytes_fetched + self.bytes_bypassed;
        if total == 0 {
            0.0
        } else {
            self.bytes_hit() as f64 / total as f64
        }
    }

    /// Counter growth since `earlier`
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            attaches: self.attaches.saturating_sub(earlier.attaches),
            detaches: self.detaches.saturating_sub(earlier.detaches),
            rejected: self.rejected.saturating_sub(earlier.rejected),
            attach_failures: self.attach_failures.saturating_sub(earlier.attach_failures),
            bytes_from_ram: self.bytes_from_ram.saturating_sub(earlier.bytes_from_ram),
            bytes_from_disk: self.bytes_from_disk.saturating_sub(earlier.bytes_from_disk),
            bytes_fetched: self.bytes_fetched.saturating_sub(earlier.bytes_fetched),
            bytes_bypassed: self.bytes_bypassed.saturating_sub(earlier.bytes_bypassed),
            blocks_prefetched: self.blocks_prefetched.saturating_sub(earlier.blocks_prefetched),
            write_failures: self.write_failures.saturating_sub(earlier.write_failures),
            disk_read_errors: self.disk_read_errors.saturating_sub(earlier.disk_read_errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats::default();
        assert_eq!(stats.snapshot().hit_ratio(), 0.0);
        stats.record_fetch(100);
        stats.record_ram_hit(50);
        stats.record_disk_hit(50);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_hit(), 100);
        assert!((snapshot.hit_ratio() - 0.5).abs() < f64::EPSILON);

        stats.record_ram_hit(30);
        let delta = stats.snapshot().since(&snapshot);
        assert_eq!(delta.bytes_from_ram, 30);
        assert_eq!(delta.bytes_fetched, 0);
    }
}
