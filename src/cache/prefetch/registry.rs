//! Round-robin registry of files eligible for prefetch
//!
//! A pass walks the files that were registered when it started. Files
//! registered mid-pass wait in `joining` and enter the rotation when the
//! next pass begins, so nobody is served twice before everyone is served
//! once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use crate::cache::sync_wrapper;
use crate::cache::traits::{FileId, PrefetchSource};

struct Entry {
    id: FileId,
    file: Weak<dyn PrefetchSource>,
}

#[derive(Default)]
struct Rotation {
    /// Files in the current pass
    current: Vec<Entry>,
    /// Registered during the current pass
    joining: Vec<Entry>,
    /// Next position in `current`
    cursor: usize,
}

impl Rotation {
    fn contains(&self, id: FileId) -> bool {
        self.current.iter().chain(self.joining.iter()).any(|e| e.id == id)
    }

    fn len(&self) -> usize {
        self.current.len() + self.joining.len()
    }

    fn remove(&mut self, id: FileId) -> bool {
        let mut removed = false;
        if let Some(pos) = self.current.iter().position(|e| e.id == id) {
            self.current.remove(pos);
            if pos < self.cursor {
                self.cursor -= 1;
            }
            removed = true;
        }
        if let Some(pos) = self.joining.iter().position(|e| e.id == id) {
            self.joining.remove(pos);
            removed = true;
        }
        removed
    }
}

/// Live set of files eligible for speculative reads
pub struct PrefetchRegistry {
    rotation: Mutex<Rotation>,
    /// Signalled on registration and shutdown
    changed: Condvar,
    shutdown: AtomicBool,
}

impl PrefetchRegistry {
    pub fn new() -> Self {
        Self {
            rotation: Mutex::new(Rotation::default()),
            changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Add a file to the rotation; no-op if already registered
    pub fn register_prefetch_file(&self, file: &Arc<dyn PrefetchSource>) {
        let id = file.file_id();
        let mut rotation = sync_wrapper::lock(&self.rotation);
        if rotation.contains(id) {
            return;
        }
        rotation.joining.push(Entry {
            id,
            file: Arc::downgrade(file),
        });
        let registered = rotation.len();
        drop(rotation);
        log::debug!("{} registered for prefetch ({} eligible)", id, registered);
        self.changed.notify_all();
    }

    /// Remove a file; safe if it was never registered
    pub fn deregister_prefetch_file(&self, id: FileId) {
        let removed = sync_wrapper::lock(&self.rotation).remove(id);
        if removed {
            log::debug!("{} deregistered from prefetch", id);
        }
    }

    /// Pick the next file in round-robin order
    pub fn get_next_file_to_prefetch(&self) -> Option<Arc<dyn PrefetchSource>> {
        let mut rotation = sync_wrapper::lock(&self.rotation);
        loop {
            if rotation.cursor >= rotation.current.len() {
                let mut joining = std::mem::take(&mut rotation.joining);
                rotation.current.append(&mut joining);
                rotation.cursor = 0;
            }
            if rotation.current.is_empty() {
                return None;
            }
            let cursor = rotation.cursor;
            match rotation.current[cursor].file.upgrade() {
                Some(file) => {
                    rotation.cursor += 1;
                    return Some(file);
                }
                None => {
                    // file dropped without deregistering
                    let stale = rotation.current.remove(cursor);
                    log::debug!("Dropping stale prefetch entry {}", stale.id);
                }
            }
        }
    }

    pub fn is_registered(&self, id: FileId) -> bool {
        sync_wrapper::lock(&self.rotation).contains(id)
    }

    /// Number of registered files
    pub fn len(&self) -> usize {
        sync_wrapper::lock(&self.rotation).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least one file is registered, shutdown, or timeout.
    ///
    /// Returns `true` if files are registered on return.
    pub fn wait_for_files(&self, timeout: Duration) -> bool {
        let rotation = sync_wrapper::lock(&self.rotation);
        if rotation.len() > 0 || self.is_shut_down() {
            return rotation.len() > 0;
        }
        let (rotation, _timed_out) = sync_wrapper::wait_timeout(&self.changed, rotation, timeout);
        rotation.len() > 0
    }

    /// Sleep up to `timeout`, waking early on registration or shutdown
    pub fn park(&self, timeout: Duration) {
        let rotation = sync_wrapper::lock(&self.rotation);
        if self.is_shut_down() {
            return;
        }
        let _ = sync_wrapper::wait_timeout(&self.changed, rotation, timeout);
    }

    pub fn shutdown(&self) {
        let _rotation = sync_wrapper::lock(&self.rotation);
        self.shutdown.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Default for PrefetchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrefetchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchRegistry")
            .field("registered", &self.len())
            .field("shutdown", &self.is_shut_down())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingSource;
    use super::*;
    use std::thread;

    fn as_source(file: &Arc<CountingSource>) -> Arc<dyn PrefetchSource> {
        file.clone()
    }

    fn next_id(registry: &PrefetchRegistry) -> Option<u64> {
        registry.get_next_file_to_prefetch().map(|f| f.file_id().0)
    }

    #[test]
    fn test_round_robin_cycles_all_files() {
        let registry = PrefetchRegistry::new();
        let files: Vec<_> = (1..=3).map(|id| CountingSource::new(id, 10)).collect();
        let sources: Vec<_> = files.iter().map(as_source).collect();
        for source in &sources {
            registry.register_prefetch_file(source);
        }

        let picks: Vec<u64> = (0..6).filter_map(|_| next_id(&registry)).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let registry = PrefetchRegistry::new();
        let file = CountingSource::new(1, 1);
        let source = as_source(&file);
        registry.register_prefetch_file(&source);
        registry.register_prefetch_file(&source);
        assert_eq!(registry.len(), 1);

        registry.deregister_prefetch_file(FileId(1));
        registry.deregister_prefetch_file(FileId(1));
        registry.deregister_prefetch_file(FileId(42));
        assert!(registry.is_empty());
        assert!(registry.get_next_file_to_prefetch().is_none());
    }

    #[test]
    fn test_late_registration_joins_next_pass() {
        let registry = PrefetchRegistry::new();
        let files: Vec<_> = (1..=4).map(|id| CountingSource::new(id, 10)).collect();
        let sources: Vec<_> = files.iter().map(as_source).collect();
        for source in &sources[..3] {
            registry.register_prefetch_file(source);
        }

        assert_eq!(next_id(&registry), Some(1));
        registry.register_prefetch_file(&sources[3]);
        assert_eq!(next_id(&registry), Some(2));
        assert_eq!(next_id(&registry), Some(3));
        // new file enters at the start of the next pass
        let picks: Vec<u64> = (0..4).filter_map(|_| next_id(&registry)).collect();
        assert_eq!(picks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_deregister_mid_pass_keeps_rotation() {
        let registry = PrefetchRegistry::new();
        let files: Vec<_> = (1..=3).map(|id| CountingSource::new(id, 10)).collect();
        let sources: Vec<_> = files.iter().map(as_source).collect();
        for source in &sources {
            registry.register_prefetch_file(source);
        }

        assert_eq!(next_id(&registry), Some(1));
        assert_eq!(next_id(&registry), Some(2));
        registry.deregister_prefetch_file(FileId(1));
        assert_eq!(next_id(&registry), Some(3));
        assert_eq!(next_id(&registry), Some(2));
        assert_eq!(next_id(&registry), Some(3));
    }

    #[test]
    fn test_dropped_files_are_skipped() {
        let registry = PrefetchRegistry::new();
        let keep = CountingSource::new(1, 1);
        let keep_source = as_source(&keep);
        registry.register_prefetch_file(&keep_source);
        {
            let gone = CountingSource::new(2, 1);
            registry.register_prefetch_file(&as_source(&gone));
        }
        assert_eq!(next_id(&registry), Some(1));
        assert_eq!(next_id(&registry), Some(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wait_for_files_wakes_on_register() {
        let registry = Arc::new(PrefetchRegistry::new());
        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.wait_for_files(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        let file = CountingSource::new(1, 1);
        let source = as_source(&file);
        registry.register_prefetch_file(&source);
        assert!(waiter.join().unwrap());
    }
}
