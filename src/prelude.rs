//! proxycache prelude - convenient imports for users

pub use crate::proxycache::{ProxyCache, ProxyCacheBuilder};

pub use crate::cache::traits::{CacheOperationError, FileId, RecoveryHint};

pub use crate::cache::config::{ByteSize, CacheConfig, DecisionConfig, Watermark};
pub use crate::cache::coordinator::ProxyCacheStats;
pub use crate::cache::decision::{
    Decision, DecisionChain, DecisionTarget, MinimumSizeDecision, PathPatternDecision,
};
pub use crate::cache::file::{CachingIo, FileStat};
pub use crate::cache::purge::PurgeReport;
pub use crate::cache::remote::{LocalFileIo, MemoryRemoteIo, RemoteIo};
pub use crate::cache::storage::{DiskBackend, LocalDiskBackend, MemoryDiskBackend};
