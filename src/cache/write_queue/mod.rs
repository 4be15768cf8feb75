//! Bounded disk-write queue and its writer loop
//!
//! Filled blocks wait here, oldest first, until a writer thread persists
//! them and returns their RAM buffers to the pool. Producers check
//! `have_free_writing_slots` before adding; the queue itself never refuses
//! an entry while running.

pub mod queue;
pub mod statistics;
pub mod writer;

pub use queue::{WriteQueue, WriteTask};
pub use statistics::{WriteQueueStats, WriteQueueStatsSnapshot};
pub use writer::{WriteOutcome, WriterPool};
