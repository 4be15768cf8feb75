//! Cache orchestration
//!
//! The coordinator owns the shared [`CacheContext`], the decision chain and
//! the purge loop, runs the background threads, and implements the
//! attach/detach lifecycle of cached files.

pub mod context;
pub mod manager;
pub mod statistics;

pub use context::CacheContext;
pub use manager::{CacheCoordinator, ProxyCacheStats};
pub use statistics::{CacheStats, CacheStatsSnapshot};
