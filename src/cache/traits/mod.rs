//! Cache traits and shared error type

pub mod core;
pub mod error;

pub use self::core::{BlockSink, FileId, PrefetchOutcome, PrefetchSource};
pub use error::{CacheOperationError, RecoveryHint};
