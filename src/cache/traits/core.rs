//! Collaborator contracts between the core engine and the per-file layer
//!
//! The write queue and the prefetch scheduler only ever see files through
//! these traits. They hold `Weak`/`Arc` handles, never raw references, so a
//! file that is torn down while one of its blocks is in flight cannot be
//! dereferenced after it is gone.

use std::fmt;
use std::sync::Arc;

use crate::cache::block::Block;
use crate::cache::memory::RamReservation;
use crate::cache::traits::error::CacheOperationError;

/// Process-unique identity of an open cached file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Receiver of disk-write completions for blocks a file submitted
pub trait BlockSink: Send + Sync {
    /// Called by the writer loop once the block's write finished or failed.
    /// The block's RAM buffer has already been returned to the pool.
    fn write_completed(&self, block: &Arc<Block>, result: Result<(), CacheOperationError>);
}

/// Result of asking a file to fill one speculative block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// A block was read and handed to the write queue
    Issued,
    /// Nothing could be issued right now (cap reached, remote error, queue full)
    Busy,
    /// The file has no uncached range left
    Complete,
}

/// A file eligible for speculative reads
pub trait PrefetchSource: Send + Sync {
    fn file_id(&self) -> FileId;

    /// Number of prefetched blocks still holding a RAM buffer
    fn prefetch_blocks_in_flight(&self) -> usize;

    /// Fill the next uncached block using the given RAM reservation.
    /// Dropping the reservation unused returns the buffer to the pool.
    fn prefetch_block(&self, reservation: RamReservation) -> PrefetchOutcome;
}
