//! Public API for the proxy cache
//!
//! A [`ProxyCache`] is explicitly constructed and owned by the embedding
//! process; one instance per process is the caller's responsibility. It
//! starts its writer, prefetch and purge threads when built and stops them
//! on [`ProxyCache::shutdown`] or drop.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::config::{ByteSize, CacheConfig, Watermark};
use crate::cache::coordinator::{CacheContext, CacheCoordinator, ProxyCacheStats};
use crate::cache::decision::{Decision, DecisionChain};
use crate::cache::file::{CachingIo, FileStat};
use crate::cache::purge::PurgeReport;
use crate::cache::remote::RemoteIo;
use crate::cache::storage::{DiskBackend, LocalDiskBackend};
use crate::cache::traits::CacheOperationError;

pub struct ProxyCache {
    coordinator: Arc<CacheCoordinator>,
}

impl ProxyCache {
    /// Create new cache builder with fluent configuration
    pub fn builder() -> ProxyCacheBuilder {
        ProxyCacheBuilder::new()
    }

    /// Build a cache from a loaded configuration, stored under `cache_dir`
    pub fn new(config: CacheConfig) -> Result<Self, CacheOperationError> {
        Self::builder().config(config).build()
    }

    /// Wrap `io` in a caching handle.
    ///
    /// `None` means the file is not cached: rejected by the decision chain,
    /// its size is unknown, or the cache is shut down. The caller then reads
    /// `io` directly.
    pub fn attach(&self, io: Arc<dyn RemoteIo>) -> Option<CachingIo> {
        self.coordinator.attach(io)
    }

    /// Release a caching handle; same as dropping it
    pub fn detach(&self, io: CachingIo) {
        self.coordinator.detach(io);
    }

    /// Number of live caching handles
    pub fn is_attached(&self) -> usize {
        self.coordinator.is_attached()
    }

    /// Whether `path` can be cached right now
    pub fn prepare(&self, path: &str) -> bool {
        self.coordinator.prepare(path)
    }

    /// What the local store holds for `path`, `None` if nothing
    pub fn stat(&self, path: &str) -> Option<FileStat> {
        self.coordinator.stat(path)
    }

    /// Run the decision chain for `io` without attaching
    pub fn decide(&self, io: &dyn RemoteIo) -> bool {
        self.coordinator.decide(io)
    }

    pub fn config(&self) -> &CacheConfig {
        self.coordinator.context().config()
    }

    pub fn stats(&self) -> ProxyCacheStats {
        self.coordinator.stats()
    }

    /// One purge pass now, independent of the periodic schedule
    pub fn purge_now(&self) -> Result<PurgeReport, CacheOperationError> {
        self.coordinator.purge_now()
    }

    /// Stop background threads; queued writes are flushed first
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

impl Drop for ProxyCache {
    fn drop(&mut self) {
        self.coordinator.shutdown();
    }
}

impl std::fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCache")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Fluent builder for ProxyCache configuration
pub struct ProxyCacheBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn DiskBackend>>,
    plugins: Vec<Box<dyn Decision>>,
}

impl ProxyCacheBuilder {
    /// Create new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            backend: None,
            plugins: Vec::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Set bytes per block
    pub fn buffer_size(mut self, bytes: u64) -> Self {
        self.config.buffer_size = ByteSize(bytes);
        self
    }

    /// Set the RAM budget in bytes
    pub fn ram_budget(mut self, bytes: u64) -> Self {
        self.config.ram_abs_available = ByteSize(bytes);
        self
    }

    /// Set the RAM buffer count directly
    pub fn ram_buffers(mut self, count: usize) -> Self {
        self.config.num_ram_buffers = Some(count);
        self
    }

    /// Set disk watermarks in bytes
    pub fn watermarks(mut self, lwm: u64, hwm: u64) -> Self {
        self.config.disk_usage_lwm = Watermark::Bytes(lwm);
        self.config.disk_usage_hwm = Watermark::Bytes(hwm);
        self
    }

    /// Enable prefetch with a per-file cap on outstanding blocks
    pub fn prefetch(mut self, max_blocks_per_file: usize) -> Self {
        self.config.prefetch_enabled = true;
        self.config.prefetch_max_blocks_per_file = max_blocks_per_file;
        self
    }

    /// Cache files as independent units of `unit_size` bytes
    pub fn block_mode(mut self, unit_size: u64) -> Self {
        self.config.block_mode = true;
        self.config.block_mode_unit_size = ByteSize(unit_size);
        self
    }

    pub fn write_queue_max_bytes(mut self, bytes: u64) -> Self {
        self.config.write_queue_max_bytes = Some(ByteSize(bytes));
        self
    }

    pub fn writer_threads(mut self, count: usize) -> Self {
        self.config.writer_threads = count;
        self
    }

    pub fn purge_interval_secs(mut self, secs: u64) -> Self {
        self.config.purge_interval_secs = secs;
        self
    }

    /// Store blocks through `backend` instead of the local directory
    pub fn backend(mut self, backend: Arc<dyn DiskBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Append a decision plugin after those from the configuration
    pub fn decision(mut self, plugin: impl Decision + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Validate the configuration and start the cache
    pub fn build(self) -> Result<ProxyCache, CacheOperationError> {
        self.config.validate()?;
        let mut decisions = DecisionChain::from_config(&self.config.decisions)?;
        for plugin in self.plugins {
            decisions.push(plugin);
        }
        let backend: Arc<dyn DiskBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(LocalDiskBackend::new(&self.config.cache_dir)?),
        };
        let ctx = CacheContext::new(self.config, backend)?;
        let coordinator = CacheCoordinator::new(ctx, decisions)?;
        log::info!("Proxy cache ready");
        Ok(ProxyCache { coordinator })
    }
}

impl Default for ProxyCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
