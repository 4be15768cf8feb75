//! proxycache - disk and RAM block cache in front of remote file access
//!
//! Repeated reads of a remote file are absorbed into a bounded set of
//! fixed-size RAM buffers that drain asynchronously into a local disk
//! store, so a client re-reading a file does not repeat the transfer.
//!
//! # Features
//!
//! - **Bounded RAM**: a counted pool of block buffers, never oversubscribed
//! - **Write-back**: filled blocks are persisted by dedicated writer threads
//! - **Prefetch**: round-robin speculative reads across open files
//! - **Watermark purge**: least recently used files are evicted between HWM and LWM
//! - **Decision chain**: per-file opt-out by path pattern or size

// Public API modules
pub mod prelude;
pub mod proxycache;

// CLI module (for binary)
#[cfg(feature = "cli")]
pub mod cli;

pub mod cache;

pub use prelude::*;
pub use proxycache::{ProxyCache, ProxyCacheBuilder};
