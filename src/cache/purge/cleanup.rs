//! One purge pass over the disk store

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::cache::storage::DiskBackend;
use crate::cache::traits::CacheOperationError;

/// Decides, per stored file, whether the purge loop may remove it
pub trait EvictionGuard: Send + Sync {
    /// Run `remove` unless `path` is in use and return its result, or `None`
    /// when the file was skipped. The file must not be opened while
    /// `remove` runs.
    fn evict_if_idle(
        &self,
        path: &str,
        remove: &mut dyn FnMut() -> Result<u64, CacheOperationError>,
    ) -> Option<Result<u64, CacheOperationError>>;
}

impl<F> EvictionGuard for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn evict_if_idle(
        &self,
        path: &str,
        remove: &mut dyn FnMut() -> Result<u64, CacheOperationError>,
    ) -> Option<Result<u64, CacheOperationError>> {
        if self(path) {
            None
        } else {
            Some(remove())
        }
    }
}

/// Outcome of one `cache_dir_cleanup` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Occupancy found by the scan
    pub occupancy_before: u64,
    /// Occupancy after evictions
    pub occupancy_after: u64,
    /// High-water mark was reached and eviction ran
    pub triggered: bool,
    /// Evicted logical paths, oldest access first
    pub evicted: Vec<String>,
    pub bytes_freed: u64,
    /// Candidates skipped because they are attached
    pub deferred: Vec<String>,
    /// Removals that failed
    pub errors: usize,
}

/// Watermark-driven eviction policy
#[derive(Debug)]
pub struct PurgeLoop {
    lwm: i64,
    hwm: i64,
    runs: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
    bytes_freed: CachePadded<AtomicU64>,
    deferred: CachePadded<AtomicU64>,
    last_occupancy: CachePadded<AtomicU64>,
}

impl PurgeLoop {
    /// `lwm`/`hwm` in bytes; both negative disables eviction
    pub fn new(lwm: i64, hwm: i64) -> Self {
        Self {
            lwm,
            hwm,
            runs: CachePadded::new(AtomicU64::new(0)),
            evictions: CachePadded::new(AtomicU64::new(0)),
            bytes_freed: CachePadded::new(AtomicU64::new(0)),
            deferred: CachePadded::new(AtomicU64::new(0)),
            last_occupancy: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Eviction runs only when both watermarks are set
    pub fn is_enabled(&self) -> bool {
        self.lwm >= 0 && self.hwm >= 0
    }

    /// Scan occupancy and evict down to the low-water mark if needed
    pub fn cache_dir_cleanup(
        &self,
        backend: &dyn DiskBackend,
        guard: &dyn EvictionGuard,
    ) -> Result<PurgeReport, CacheOperationError> {
        let usage = backend.scan().map_err(|e| {
            log::error!("Cache directory scan failed: {}", e);
            e
        })?;
        self.runs.fetch_add(1, Ordering::Relaxed);

        let mut report = PurgeReport {
            occupancy_before: usage.total_bytes,
            occupancy_after: usage.total_bytes,
            ..PurgeReport::default()
        };

        if !self.is_enabled() || usage.total_bytes < self.hwm as u64 {
            log::debug!(
                "Disk occupancy {} bytes, purge not needed (hwm {})",
                usage.total_bytes,
                self.hwm
            );
            self.last_occupancy
                .store(usage.total_bytes, Ordering::Relaxed);
            return Ok(report);
        }

        report.triggered = true;
        let lwm = self.lwm as u64;
        log::info!(
            "Disk occupancy {} bytes reached high-water mark {}, purging to {}",
            usage.total_bytes,
            self.hwm,
            lwm
        );

        let mut candidates = usage.files;
        candidates.sort_by(|a, b| match a.last_access.cmp(&b.last_access) {
            CmpOrdering::Equal => a.path.cmp(&b.path),
            other => other,
        });

        let mut occupancy = usage.total_bytes;
        for candidate in candidates {
            if occupancy <= lwm {
                break;
            }
            let removal =
                guard.evict_if_idle(&candidate.path, &mut || backend.remove(&candidate.path));
            match removal {
                None => {
                    log::debug!("Purge deferred for attached file {}", candidate.path);
                    report.deferred.push(candidate.path);
                }
                Some(Ok(freed)) => {
                    occupancy = occupancy.saturating_sub(freed);
                    report.bytes_freed += freed;
                    log::debug!("Purged {} ({} bytes)", candidate.path, freed);
                    report.evicted.push(candidate.path);
                }
                Some(Err(e)) => {
                    log::warn!("Failed to purge {}: {}", candidate.path, e);
                    report.errors += 1;
                }
            }
        }
        report.occupancy_after = occupancy;

        if occupancy > lwm {
            log::warn!(
                "Purge stopped at {} bytes, above low-water mark {} ({} deferred)",
                occupancy,
                lwm,
                report.deferred.len()
            );
        }
        self.evictions
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        self.bytes_freed
            .fetch_add(report.bytes_freed, Ordering::Relaxed);
        self.deferred
            .fetch_add(report.deferred.len() as u64, Ordering::Relaxed);
        self.last_occupancy.store(occupancy, Ordering::Relaxed);
        Ok(report)
    }

    pub fn stats(&self) -> PurgeStatsSnapshot {
        PurgeStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            last_occupancy: self.last_occupancy.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeStatsSnapshot {
    pub runs: u64,
    pub evictions: u64,
    pub bytes_freed: u64,
    pub deferred: u64,
    /// Occupancy after the most recent pass
    pub last_occupancy: u64,
}
