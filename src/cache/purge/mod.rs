//! Disk occupancy purge
//!
//! Periodically rescans the store and, once occupancy reaches the high-water
//! mark, evicts least recently accessed files until it is at or below the
//! low-water mark. Files with live attachments are never removed underneath
//! a reader; they are reported as deferred.

pub mod cleanup;
pub mod worker;

pub use cleanup::{EvictionGuard, PurgeLoop, PurgeReport, PurgeStatsSnapshot};
pub use worker::PurgeWorker;
