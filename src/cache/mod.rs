//! Cache system module
//!
//! The resource-management engine (RAM buffer pool, write queue, prefetch
//! scheduler, purge loop, decision gate) plus the per-file layer and
//! storage backends it drives.

pub mod block;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod file;
pub mod memory;
pub mod prefetch;
pub mod purge;
pub mod remote;
pub mod storage;
pub mod sync_wrapper;
pub mod traits;
pub mod write_queue;
