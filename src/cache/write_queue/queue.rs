//! FIFO of filled blocks awaiting a disk write
//!
//! One mutex guards the entries and their aggregate size; the paired
//! condition variable wakes writers when an entry arrives or the queue is
//! shut down. Withdrawal scans mid-queue, which is why this is a guarded
//! `VecDeque` rather than a channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::statistics::{WriteQueueStats, WriteQueueStatsSnapshot};
use crate::cache::block::{Block, WriteState};
use crate::cache::sync_wrapper;
use crate::cache::traits::FileId;

/// One queued write
#[derive(Debug, Clone)]
pub struct WriteTask {
    pub block: Arc<Block>,
    /// Block was demanded by a client read rather than prefetched
    pub from_read: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<WriteTask>,
    /// Sum of `block.len()` over queued tasks
    queued_bytes: u64,
}

/// Ordered, size-bounded write queue
#[derive(Debug)]
pub struct WriteQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    /// Admission ceiling for `have_free_writing_slots`
    max_bytes: u64,
    shutdown: AtomicBool,
    stats: WriteQueueStats,
}

/// What a writer got from the queue
pub(crate) enum Dequeued {
    Task(WriteTask),
    /// Timed out with nothing to do
    Idle,
    /// Shut down and fully drained
    Closed,
}

impl WriteQueue {
    /// Create a queue whose admission ceiling is `max_bytes`
    pub fn new(max_bytes: u64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            max_bytes,
            shutdown: AtomicBool::new(false),
            stats: WriteQueueStats::default(),
        }
    }

    /// Append a full block at the tail.
    ///
    /// Returns `false` only after shutdown, in which case the block is
    /// marked withdrawn and its buffer released.
    pub fn add_write_task(&self, block: Arc<Block>, from_read: bool) -> bool {
        let mut state = sync_wrapper::lock(&self.state);
        if self.shutdown.load(Ordering::Acquire) {
            drop(state);
            log::debug!(
                "Write queue shut down, dropping block {} of {}",
                block.index(),
                block.owner()
            );
            block.finish(WriteState::Withdrawn);
            return false;
        }
        block.set_write_state(WriteState::Pending);
        state.queued_bytes += block.len() as u64;
        state.tasks.push_back(WriteTask { block, from_read });
        let depth = state.tasks.len();
        drop(state);

        self.stats.record_enqueue(from_read);
        log::trace!("Write task queued, depth {}", depth);
        self.available.notify_one();
        true
    }

    /// Whether the queued byte total is below the admission ceiling
    pub fn have_free_writing_slots(&self) -> bool {
        sync_wrapper::lock(&self.state).queued_bytes < self.max_bytes
    }

    /// Withdraw every queued entry owned by `file`.
    ///
    /// Used by file teardown. Withdrawn blocks are marked `Withdrawn` and
    /// their RAM buffers released. A block already popped by a writer is not
    /// in the queue any more and completes on its own; the writer holds its
    /// own `Arc` and only a `Weak` to the file.
    pub fn remove_write_q_entries_for(&self, file: FileId) -> usize {
        let withdrawn: Vec<WriteTask> = {
            let mut state = sync_wrapper::lock(&self.state);
            let mut kept = VecDeque::with_capacity(state.tasks.len());
            let mut withdrawn = Vec::new();
            for task in state.tasks.drain(..) {
                if task.block.owner() == file {
                    withdrawn.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            let freed: u64 = withdrawn.iter().map(|t| t.block.len() as u64).sum();
            state.queued_bytes -= freed;
            state.tasks = kept;
            withdrawn
        };

        for task in &withdrawn {
            task.block.finish(WriteState::Withdrawn);
        }
        if !withdrawn.is_empty() {
            self.stats.record_withdrawn(withdrawn.len() as u64);
            log::debug!("Withdrew {} queued writes of {}", withdrawn.len(), file);
        }
        withdrawn.len()
    }

    /// Pop the head entry, waiting up to `timeout` (forever if `None`)
    pub(crate) fn dequeue(&self, timeout: Option<Duration>) -> Dequeued {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = sync_wrapper::lock(&self.state);
        loop {
            if let Some(task) = state.tasks.pop_front() {
                state.queued_bytes -= task.block.len() as u64;
                task.block.set_write_state(WriteState::InFlight);
                return Dequeued::Task(task);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Dequeued::Closed;
            }
            state = match deadline {
                None => sync_wrapper::wait(&self.available, state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Dequeued::Idle;
                    }
                    sync_wrapper::wait_timeout(&self.available, state, deadline - now).0
                }
            };
        }
    }

    /// Stop accepting entries and wake all writers; queued entries still drain
    pub fn shutdown(&self) {
        // taken under the lock so a writer cannot miss the wake-up
        let _state = sync_wrapper::lock(&self.state);
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        sync_wrapper::lock(&self.state).tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate size of queued blocks
    pub fn queued_bytes(&self) -> u64 {
        sync_wrapper::lock(&self.state).queued_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Number of queued entries owned by `file`
    pub fn entries_for(&self, file: FileId) -> usize {
        sync_wrapper::lock(&self.state)
            .tasks
            .iter()
            .filter(|task| task.block.owner() == file)
            .count()
    }

    pub(crate) fn stats_handle(&self) -> &WriteQueueStats {
        &self.stats
    }

    pub fn stats(&self) -> WriteQueueStatsSnapshot {
        let (blocks, bytes) = {
            let state = sync_wrapper::lock(&self.state);
            (state.tasks.len(), state.queued_bytes)
        };
        self.stats.snapshot(blocks, bytes)
    }
}
