//! Named mutex namespace: a registry of independently lockable mutexes
//! keyed by string name, created on first use and reclaimed once nobody
//! holds or waits on them.
//!
//! A caller locking a name that doesn't exist yet creates it; a caller
//! locking a name already held blocks on that name's own mutex, not on
//! the namespace lock, so unrelated names never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use thiserror::Error;

/// Always-empty today; kept as a distinct type so namespace failures
/// have a name of their own at the [`crate::error::PropError`] boundary.
#[derive(Error, Debug)]
pub enum NamedMutexError {}

struct Entry {
    mutex: Arc<Mutex<()>>,
    refcount: usize,
}

/// A namespace of named mutexes. Entries are created lazily on first
/// [`lock`](NamedMutexNamespace::lock) and dropped once their refcount
/// returns to zero.
pub struct NamedMutexNamespace {
    entries: Mutex<HashMap<String, Entry>>,
}

impl NamedMutexNamespace {
    pub fn new() -> Self {
        NamedMutexNamespace {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the mutex for `name`, creating it if this is the first
    /// reference. The refcount is incremented while the namespace lock is
    /// still held, before blocking on the per-name mutex, so a concurrent
    /// caller can never observe the entry being torn down underneath it.
    pub fn lock(&self, name: &str) -> NamedMutexGuard {
        let per_name = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(name.to_string()).or_insert_with(|| Entry {
                mutex: Arc::new(Mutex::new(())),
                refcount: 0,
            });
            entry.refcount += 1;
            entry.mutex.clone()
        };

        let guard = Mutex::lock_arc(&per_name);

        NamedMutexGuard {
            namespace: self,
            name: name.to_string(),
            _guard: guard,
        }
    }

    fn release(&self, name: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(name) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entries.remove(name);
            }
        }
    }

    /// Number of names currently tracked (held or merely created and not
    /// yet reclaimed). Exposed for control-channel introspection and
    /// tests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NamedMutexNamespace {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`NamedMutexNamespace::lock`]. Dropping it
/// unlocks the per-name mutex and decrements the name's refcount,
/// removing the entry entirely once it reaches zero. Holding the guard
/// by its `Arc` (rather than borrowing through the namespace map) means
/// the mutex stays alive even if another thread removes the entry from
/// the map concurrently.
pub struct NamedMutexGuard<'a> {
    namespace: &'a NamedMutexNamespace,
    name: String,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        self.namespace.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_creates_and_reclaims_entry() {
        let ns = NamedMutexNamespace::new();
        assert!(ns.is_empty());
        {
            let _g = ns.lock("x");
            assert_eq!(ns.len(), 1);
        }
        assert!(ns.is_empty());
    }

    #[test]
    fn distinct_names_do_not_contend() {
        let ns = Arc::new(NamedMutexNamespace::new());
        let ns2 = ns.clone();
        let _g1 = ns.lock("a");
        let handle = thread::spawn(move || {
            let _g2 = ns2.lock("b");
        });
        handle.join().unwrap();
    }

    #[test]
    fn same_name_serializes_critical_sections() {
        let ns = Arc::new(NamedMutexNamespace::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ns = ns.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                let _g = ns.lock("shared");
                let before = counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
                assert_eq!(counter.load(Ordering::SeqCst), before + 1);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(ns.is_empty());
    }
}
