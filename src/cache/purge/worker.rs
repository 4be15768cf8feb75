//! Periodic purge thread
//!
//! Driven by a `crossbeam_channel::tick` and a shutdown channel, the way the
//! maintenance workers wait on work and shutdown together.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};

use super::cleanup::{EvictionGuard, PurgeLoop};
use crate::cache::storage::DiskBackend;
use crate::cache::traits::CacheOperationError;

/// Background thread running `cache_dir_cleanup` every interval
pub struct PurgeWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PurgeWorker {
    /// Spawn the thread; the first pass runs immediately
    pub fn start(
        purge: Arc<PurgeLoop>,
        backend: Arc<dyn DiskBackend>,
        guard: Arc<dyn EvictionGuard>,
        interval: Duration,
    ) -> Result<Self, CacheOperationError> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("proxycache-purge".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                log::debug!("Purge loop started, interval {:?}", interval);
                loop {
                    if let Err(e) = purge.cache_dir_cleanup(backend.as_ref(), guard.as_ref()) {
                        log::error!("Purge pass failed: {}", e);
                    }
                    select! {
                        recv(ticker) -> _ => {}
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("Purge loop finished");
            })
            .map_err(|e| {
                log::error!("Failed to spawn purge thread: {}", e);
                CacheOperationError::initialization_failed(format!(
                    "purge thread spawn failed: {}",
                    e
                ))
            })?;
        log::info!("Purge thread started");
        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        // dropping the sender disconnects the channel and wakes the select
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Purge thread panicked");
            }
            log::info!("Purge thread stopped");
        }
    }
}

impl Drop for PurgeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryDiskBackend;
    use std::time::{Instant, SystemTime};

    #[test]
    fn test_worker_runs_periodically_and_stops() {
        let backend = Arc::new(MemoryDiskBackend::new());
        backend.insert_file("/a", 100, SystemTime::UNIX_EPOCH);
        let purge = Arc::new(PurgeLoop::new(10, 50));
        let guard: Arc<dyn EvictionGuard> = Arc::new(|_: &str| false);

        let mut worker = PurgeWorker::start(
            Arc::clone(&purge),
            backend.clone() as Arc<dyn DiskBackend>,
            guard,
            Duration::from_millis(10),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while purge.stats().runs < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();

        assert!(purge.stats().runs >= 3);
        assert!(!backend.contains("/a"));
        assert_eq!(purge.stats().evictions, 1);
    }
}
