//! Block: one RAM buffer's worth of a cached file
//!
//! A block is owned by its file. The write queue holds a second `Arc` to it
//! plus a `Weak` back-reference to the file, so the writer loop can finish a
//! write for a file that was torn down meanwhile without touching freed state.
//! The RAM reservation lives inside the buffer: dropping the buffer is what
//! returns the slot to the pool.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::cache::memory::RamReservation;
use crate::cache::sync_wrapper;
use crate::cache::traits::{BlockSink, FileId};

/// Fill progress of a block's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Empty,
    Filling,
    Full,
}

/// Disk-write progress of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Not handed to the write queue
    NotQueued,
    /// Waiting in the write queue
    Pending,
    /// Popped by a writer, write in progress
    InFlight,
    Written,
    Failed,
    /// Removed from the queue by file teardown
    Withdrawn,
}

impl WriteState {
    /// True while the block is in the write queue or being written
    pub fn is_queued(self) -> bool {
        matches!(self, WriteState::Pending | WriteState::InFlight)
    }
}

/// Why the block was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
    /// Demanded by a client read
    Read,
    /// Speculative read issued by the prefetch loop
    Prefetch,
}

/// RAM bytes of a block together with the pool slot that pays for them
struct BlockBuffer {
    data: Vec<u8>,
    _reservation: RamReservation,
}

struct BlockState {
    fill: FillState,
    write: WriteState,
    buffer: Option<BlockBuffer>,
}

/// One fixed-size chunk of a remote file
pub struct Block {
    owner: FileId,
    /// Path of the owning file inside the disk store
    storage_path: String,
    /// Block number within the owning file
    index: u64,
    /// Byte offset within the stored file
    offset: u64,
    /// Bytes of valid data (last block of a file may be short)
    len: usize,
    origin: BlockOrigin,
    state: Mutex<BlockState>,
    sink: Weak<dyn BlockSink>,
}

impl Block {
    /// Create an empty block backed by a freshly reserved RAM buffer
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: FileId,
        storage_path: impl Into<String>,
        index: u64,
        offset: u64,
        len: usize,
        origin: BlockOrigin,
        reservation: RamReservation,
        sink: Weak<dyn BlockSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            owner,
            storage_path: storage_path.into(),
            index,
            offset,
            len,
            origin,
            state: Mutex::new(BlockState {
                fill: FillState::Empty,
                write: WriteState::NotQueued,
                buffer: Some(BlockBuffer {
                    data: vec![0u8; len],
                    _reservation: reservation,
                }),
            }),
            sink,
        })
    }

    pub fn owner(&self) -> FileId {
        self.owner
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn origin(&self) -> BlockOrigin {
        self.origin
    }

    /// Back-reference to the owning file, if it is still alive
    pub fn sink(&self) -> Option<Arc<dyn BlockSink>> {
        self.sink.upgrade()
    }

    pub fn fill_state(&self) -> FillState {
        sync_wrapper::lock(&self.state).fill
    }

    pub fn write_state(&self) -> WriteState {
        sync_wrapper::lock(&self.state).write
    }

    pub fn set_write_state(&self, write: WriteState) {
        sync_wrapper::lock(&self.state).write = write;
    }

    /// True while the block still counts against the RAM pool
    pub fn holds_buffer(&self) -> bool {
        sync_wrapper::lock(&self.state).buffer.is_some()
    }

    /// Fill the buffer with `fill`, which receives the whole block slice.
    ///
    /// On error the block stays `Empty` and keeps its buffer; the caller
    /// decides whether to drop it.
    pub fn fill<E>(&self, fill: impl FnOnce(&mut [u8]) -> Result<(), E>) -> Result<(), E> {
        let mut state = sync_wrapper::lock(&self.state);
        let Some(buffer) = state.buffer.as_mut() else {
            return Ok(());
        };
        // data is moved out so the fill closure does not run under the block lock
        let mut data = std::mem::take(&mut buffer.data);
        state.fill = FillState::Filling;
        drop(state);

        let result = fill(&mut data);

        let mut state = sync_wrapper::lock(&self.state);
        if let Some(buffer) = state.buffer.as_mut() {
            buffer.data = data;
        }
        state.fill = if result.is_ok() {
            FillState::Full
        } else {
            FillState::Empty
        };
        result
    }

    /// Copy bytes starting at `block_offset` into `dst`.
    ///
    /// Returns `None` when the block is not full or its buffer is gone.
    pub fn copy_out(&self, block_offset: usize, dst: &mut [u8]) -> Option<usize> {
        let state = sync_wrapper::lock(&self.state);
        if state.fill != FillState::Full {
            return None;
        }
        let buffer = state.buffer.as_ref()?;
        if block_offset >= buffer.data.len() {
            return Some(0);
        }
        let n = dst.len().min(buffer.data.len() - block_offset);
        dst[..n].copy_from_slice(&buffer.data[block_offset..block_offset + n]);
        Some(n)
    }

    /// Run `f` on the buffer contents while holding the block lock
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let state = sync_wrapper::lock(&self.state);
        if state.fill != FillState::Full {
            return None;
        }
        state.buffer.as_ref().map(|buffer| f(&buffer.data))
    }

    /// Drop the RAM buffer, returning its slot to the pool.
    ///
    /// Returns `true` if a buffer was held.
    pub fn release_buffer(&self) -> bool {
        let buffer = sync_wrapper::lock(&self.state).buffer.take();
        buffer.is_some()
    }

    /// Record a final write state and release the buffer in one step
    pub fn finish(&self, write: WriteState) {
        let buffer = {
            let mut state = sync_wrapper::lock(&self.state);
            state.write = write;
            state.buffer.take()
        };
        drop(buffer);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = sync_wrapper::lock(&self.state);
        f.debug_struct("Block")
            .field("owner", &self.owner)
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("origin", &self.origin)
            .field("fill", &state.fill)
            .field("write", &state.write)
            .field("holds_buffer", &state.buffer.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::cache::memory::RamBufferPool;

    #[test]
    fn test_block_lifecycle_releases_ram_once() {
        let pool = Arc::new(RamBufferPool::new(2));
        let sink: Arc<dyn BlockSink> = Arc::new(RecordingSink::default());
        let block = full_block(&pool, FileId(1), 0, 16, 0xAB, &sink);

        assert_eq!(pool.used(), 1);
        assert_eq!(block.fill_state(), FillState::Full);
        assert_eq!(block.write_state(), WriteState::NotQueued);

        let mut out = [0u8; 4];
        assert_eq!(block.copy_out(12, &mut out), Some(4));
        assert_eq!(out, [0xAB; 4]);

        block.finish(WriteState::Written);
        assert_eq!(pool.used(), 0);
        assert!(!block.holds_buffer());
        assert!(!block.release_buffer());
        assert_eq!(pool.used(), 0);
        assert_eq!(block.copy_out(0, &mut out), None);
    }

    #[test]
    fn test_failed_fill_leaves_block_empty() {
        let pool = Arc::new(RamBufferPool::new(1));
        let sink: Arc<dyn BlockSink> = Arc::new(RecordingSink::default());
        let block = Block::new(
            FileId(3),
            "/f",
            0,
            0,
            8,
            BlockOrigin::Prefetch,
            pool.try_reserve().unwrap(),
            Arc::downgrade(&sink),
        );
        let result = block.fill(|_| Err("remote down"));
        assert_eq!(result, Err("remote down"));
        assert_eq!(block.fill_state(), FillState::Empty);
        assert!(block.holds_buffer());
        drop(block);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_sink_is_weak() {
        let pool = Arc::new(RamBufferPool::new(1));
        let sink: Arc<dyn BlockSink> = Arc::new(RecordingSink::default());
        let block = full_block(&pool, FileId(9), 0, 4, 1, &sink);
        assert!(block.sink().is_some());
        drop(sink);
        assert!(block.sink().is_none());
    }
}
