//! Prefetch registry and scheduling loop
//!
//! Files with uncached ranges register themselves; the scheduler rotates
//! over them round-robin and hands each a RAM reservation to fill one more
//! block ahead of demand.

pub mod registry;
pub mod scheduler;

pub use registry::PrefetchRegistry;
pub use scheduler::{PrefetchStep, PrefetchWorker, Prefetcher};
