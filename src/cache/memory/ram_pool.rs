//! Counted RAM buffer pool with non-blocking acquire and notifying release
//!
//! `request_ram_block` never blocks the caller. Threads that want to wait
//! for capacity (the prefetch loop) park on `wait_for_release`, which is
//! woken by every `ram_block_released`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::cache::sync_wrapper;

/// Fixed-capacity counter of RAM buffers in use
pub struct RamBufferPool {
    /// Number of buffers currently held by blocks
    used: Mutex<usize>,
    /// Signalled on every release
    released: Condvar,
    /// Upper bound for `used`
    capacity: usize,
    /// Successful reservations
    granted: CachePadded<AtomicU64>,
    /// Reservations refused because the pool was full
    denied: CachePadded<AtomicU64>,
    /// Highest `used` value observed
    peak_used: CachePadded<AtomicU64>,
}

impl RamBufferPool {
    /// Create a pool holding at most `capacity` buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            used: Mutex::new(0),
            released: Condvar::new(),
            capacity,
            granted: CachePadded::new(AtomicU64::new(0)),
            denied: CachePadded::new(AtomicU64::new(0)),
            peak_used: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Reserve one buffer slot. Returns `false` immediately when the pool is full.
    pub fn request_ram_block(&self) -> bool {
        let mut used = sync_wrapper::lock(&self.used);
        if *used < self.capacity {
            *used += 1;
            self.granted.fetch_add(1, Ordering::Relaxed);
            self.peak_used.fetch_max(*used as u64, Ordering::Relaxed);
            log::trace!("RAM block granted ({}/{})", *used, self.capacity);
            true
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            log::trace!("RAM block denied, pool full ({})", self.capacity);
            false
        }
    }

    /// Return one buffer slot and wake threads waiting for capacity.
    ///
    /// Must be paired with exactly one successful `request_ram_block`.
    pub fn ram_block_released(&self) {
        let mut used = sync_wrapper::lock(&self.used);
        debug_assert!(*used > 0, "RAM block released without a matching request");
        if *used == 0 {
            log::error!("RAM block released without a matching request; ignoring");
            return;
        }
        *used -= 1;
        drop(used);
        self.released.notify_all();
    }

    /// Reserve one slot as an RAII guard that releases on drop
    pub fn try_reserve(self: &Arc<Self>) -> Option<RamReservation> {
        if self.request_ram_block() {
            Some(RamReservation {
                pool: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Block until a buffer is free or `timeout` elapses.
    ///
    /// Returns `true` if a slot looked free on wake-up. The slot is not
    /// reserved; the caller still has to win `request_ram_block`.
    pub fn wait_for_release(&self, timeout: Duration) -> bool {
        let used = sync_wrapper::lock(&self.used);
        if *used < self.capacity {
            return true;
        }
        let (used, _timed_out) = sync_wrapper::wait_timeout(&self.released, used, timeout);
        *used < self.capacity
    }

    /// Buffers currently in use
    pub fn used(&self) -> usize {
        *sync_wrapper::lock(&self.used)
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently free
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    pub fn stats(&self) -> RamPoolStatsSnapshot {
        RamPoolStatsSnapshot {
            capacity: self.capacity,
            used: self.used(),
            granted: self.granted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            peak_used: self.peak_used.load(Ordering::Relaxed) as usize,
        }
    }
}

impl fmt::Debug for RamBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamBufferPool")
            .field("used", &self.used())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Point-in-time view of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamPoolStatsSnapshot {
    pub capacity: usize,
    pub used: usize,
    pub granted: u64,
    pub denied: u64,
    pub peak_used: usize,
}

/// One reserved buffer slot; released exactly once when dropped
pub struct RamReservation {
    pool: Arc<RamBufferPool>,
}

impl RamReservation {
    /// Pool this slot was taken from
    pub fn pool(&self) -> &Arc<RamBufferPool> {
        &self.pool
    }
}

impl fmt::Debug for RamReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamReservation").finish_non_exhaustive()
    }
}

impl Drop for RamReservation {
    fn drop(&mut self) {
        self.pool.ram_block_released();
    }
}
