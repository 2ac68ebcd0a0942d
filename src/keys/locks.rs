use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lazily created per-file mutexes.
///
/// Every read-filter-rewrite of a pool file holds the lock for that file, so two
/// retirements of different keys from the same pool cannot clobber each other.
#[derive(Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn for_path(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.locks);
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Keys held by in-flight fulfillments.
#[derive(Clone, Default)]
pub(crate) struct ReservedKeys(Arc<Mutex<HashSet<String>>>);

impl ReservedKeys {
    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        lock(&self.0).contains(key)
    }

    /// Returns false if the key is already held.
    pub(crate) fn insert(&self, key: &str) -> bool {
        lock(&self.0).insert(key.to_string())
    }

    pub(crate) fn release(&self, key: &str) {
        lock(&self.0).remove(key);
    }
}

/// Lock, ignoring poisoning. The guarded data carries no invariants.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_shares_one_lock() {
        let locks = FileLocks::default();
        let a = locks.for_path(Path::new("/tmp/key1d.txt"));
        let b = locks.for_path(Path::new("/tmp/key1d.txt"));
        let c = locks.for_path(Path::new("/tmp/key7d.txt"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_reserved_keys_are_exclusive() {
        let reserved = ReservedKeys::default();
        assert!(reserved.insert("ABC"));
        assert!(!reserved.insert("ABC"));
        assert!(reserved.contains("ABC"));
        reserved.release("ABC");
        assert!(!reserved.contains("ABC"));
    }
}
