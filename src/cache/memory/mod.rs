//! RAM buffer accounting
//!
//! A counted pool of fixed-size buffers. The pool only accounts for slots;
//! the bytes themselves are allocated by the block that holds the slot.

pub mod ram_pool;

pub use ram_pool::{RamBufferPool, RamPoolStatsSnapshot, RamReservation};
