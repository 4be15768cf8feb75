//! Writer loop: drains the write queue to the disk backend
//!
//! Each popped block is written through the backend, its RAM buffer is
//! returned to the pool whatever the result, and the owning file is told
//! the outcome if it is still alive. Failed writes are not retried here.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::queue::{Dequeued, WriteQueue, WriteTask};
use crate::cache::block::WriteState;
use crate::cache::storage::DiskBackend;
use crate::cache::traits::{CacheOperationError, FileId};

/// Result of writing one block
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub file: FileId,
    pub index: u64,
    pub bytes: usize,
    pub result: Result<(), CacheOperationError>,
}

impl WriteQueue {
    /// Write the head entry, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when nothing was dequeued.
    pub fn process_next(
        &self,
        backend: &dyn DiskBackend,
        timeout: Option<Duration>,
    ) -> Option<WriteOutcome> {
        match self.dequeue(timeout) {
            Dequeued::Task(task) => Some(self.write_task(backend, task)),
            Dequeued::Idle | Dequeued::Closed => None,
        }
    }

    /// Writer loop body. Runs until the queue is shut down and drained.
    pub fn process_write_tasks(&self, backend: &dyn DiskBackend) {
        log::debug!("Writer loop started");
        loop {
            match self.dequeue(None) {
                Dequeued::Task(task) => {
                    self.write_task(backend, task);
                }
                Dequeued::Idle => continue,
                Dequeued::Closed => break,
            }
        }
        log::debug!("Writer loop finished");
    }

    fn write_task(&self, backend: &dyn DiskBackend, task: WriteTask) -> WriteOutcome {
        let block = task.block;
        let started = Instant::now();
        let result = block
            .with_data(|data| backend.write_block(block.storage_path(), block.offset(), data))
            .unwrap_or_else(|| {
                Err(CacheOperationError::invalid_state(format!(
                    "block {} of {} has no full buffer to write",
                    block.index(),
                    block.owner()
                )))
            });

        match &result {
            Ok(()) => {
                block.finish(WriteState::Written);
                self.stats_handle()
                    .record_written(block.len() as u64, started.elapsed().as_nanos() as u64);
                log::trace!(
                    "Wrote block {} of {} ({} bytes)",
                    block.index(),
                    block.owner(),
                    block.len()
                );
            }
            Err(e) => {
                block.finish(WriteState::Failed);
                self.stats_handle().record_failed();
                log::warn!(
                    "Disk write of block {} of {} at {} failed: {}",
                    block.index(),
                    block.owner(),
                    block.storage_path(),
                    e
                );
            }
        }

        if let Some(sink) = block.sink() {
            sink.write_completed(&block, result.clone());
        } else {
            log::debug!(
                "{} was torn down before block {} finished writing",
                block.owner(),
                block.index()
            );
        }

        WriteOutcome {
            file: block.owner(),
            index: block.index(),
            bytes: block.len(),
            result,
        }
    }
}

/// Dedicated writer threads draining one queue
pub struct WriterPool {
    queue: Arc<WriteQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WriterPool {
    /// Spawn `threads` writer threads
    pub fn start(
        queue: Arc<WriteQueue>,
        backend: Arc<dyn DiskBackend>,
        threads: usize,
    ) -> Result<Self, CacheOperationError> {
        let mut handles = Vec::with_capacity(threads);
        for n in 0..threads {
            let queue = Arc::clone(&queue);
            let backend = Arc::clone(&backend);
            let handle = thread::Builder::new()
                .name(format!("proxycache-writer-{}", n))
                .spawn(move || queue.process_write_tasks(backend.as_ref()))
                .map_err(|e| {
                    log::error!("Failed to spawn writer thread: {}", e);
                    CacheOperationError::initialization_failed(format!(
                        "writer thread spawn failed: {}",
                        e
                    ))
                })?;
            handles.push(handle);
        }
        log::info!("Started {} writer thread(s)", threads);
        Ok(Self { queue, handles })
    }

    /// Shut the queue down, let writers drain it, and join them
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.queue.shutdown();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Writer thread panicked");
            }
        }
        log::info!("Writer threads stopped");
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::block::test_support::{full_block, RecordingSink};
    use crate::cache::memory::RamBufferPool;
    use crate::cache::storage::MemoryDiskBackend;
    use crate::cache::sync_wrapper;
    use crate::cache::traits::BlockSink;

    #[test]
    fn test_writes_in_fifo_order_and_releases_ram() {
        let pool = Arc::new(RamBufferPool::new(4));
        let recorder = Arc::new(RecordingSink::default());
        let sink: Arc<dyn BlockSink> = recorder.clone();
        let backend = MemoryDiskBackend::new();
        let queue = WriteQueue::new(1 << 20);

        let b1 = full_block(&pool, FileId(7), 0, 8, 1, &sink);
        let b2 = full_block(&pool, FileId(7), 1, 8, 2, &sink);
        let b3 = full_block(&pool, FileId(7), 2, 8, 3, &sink);
        for block in [&b1, &b2, &b3] {
            queue.add_write_task(Arc::clone(block), true);
        }

        for expected in 0..3u64 {
            let outcome = queue
                .process_next(&backend, Some(Duration::ZERO))
                .expect("entry queued");
            assert_eq!(outcome.index, expected);
            assert!(outcome.result.is_ok());
        }
        assert!(queue.process_next(&backend, Some(Duration::ZERO)).is_none());

        assert_eq!(pool.used(), 0);
        for block in [&b1, &b2, &b3] {
            assert_eq!(block.write_state(), WriteState::Written);
        }
        let offsets: Vec<u64> = backend.write_log().into_iter().map(|(_, o)| o).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(
            *sync_wrapper::lock(&recorder.completions),
            vec![(0, true), (1, true), (2, true)]
        );
    }

    #[test]
    fn test_failed_write_still_releases_ram() {
        let pool = Arc::new(RamBufferPool::new(1));
        let recorder = Arc::new(RecordingSink::default());
        let sink: Arc<dyn BlockSink> = recorder.clone();
        let backend = MemoryDiskBackend::new();
        backend.set_fail_writes(true);
        let queue = WriteQueue::new(1 << 20);

        let block = full_block(&pool, FileId(1), 0, 8, 0, &sink);
        queue.add_write_task(Arc::clone(&block), false);
        let outcome = queue.process_next(&backend, Some(Duration::ZERO)).unwrap();

        assert!(outcome.result.is_err());
        assert_eq!(block.write_state(), WriteState::Failed);
        assert_eq!(pool.used(), 0);
        assert_eq!(*sync_wrapper::lock(&recorder.completions), vec![(0, false)]);
        assert_eq!(queue.stats().failed, 1);
    }

    #[test]
    fn test_completion_skipped_for_dropped_file() {
        let pool = Arc::new(RamBufferPool::new(1));
        let sink: Arc<dyn BlockSink> = Arc::new(RecordingSink::default());
        let backend = MemoryDiskBackend::new();
        let queue = WriteQueue::new(1 << 20);

        queue.add_write_task(full_block(&pool, FileId(1), 0, 8, 0, &sink), true);
        drop(sink);
        let outcome = queue.process_next(&backend, Some(Duration::ZERO)).unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_writer_pool_drains_on_stop() {
        let pool = Arc::new(RamBufferPool::new(16));
        let sink: Arc<dyn BlockSink> = Arc::new(RecordingSink::default());
        let backend = Arc::new(MemoryDiskBackend::new());
        let queue = Arc::new(WriteQueue::new(1 << 20));

        let mut writers = WriterPool::start(
            Arc::clone(&queue),
            backend.clone() as Arc<dyn DiskBackend>,
            2,
        )
        .unwrap();
        for index in 0..16 {
            queue.add_write_task(full_block(&pool, FileId(3), index, 4, 9, &sink), true);
        }
        writers.stop();

        assert!(queue.is_empty());
        assert_eq!(backend.block_writes(), 16);
        assert_eq!(pool.used(), 0);
    }
}
