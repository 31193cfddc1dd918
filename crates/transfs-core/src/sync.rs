//! Keyed single-flight locks.
//!
//! Concurrent misses for the same cache key or archive path collapse onto
//! one producer; the others block on the per-key mutex and find the value
//! present when they re-check. Distinct keys never contend beyond the brief
//! registry lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A registry of per-key mutexes.
pub struct KeyedLocks<K> {
    registry: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The caller is expected to re-check its cache inside `f`: the winner
    /// of a race populates, the losers observe the populated entry.
    pub fn with<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut registry = self.registry.lock().expect("lock registry poisoned");
            Arc::clone(registry.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().expect("keyed lock poisoned");
            f()
        };

        // Drop the registry entry once nobody else holds a clone, so the
        // registry does not grow with every key ever seen.
        let mut registry = self.registry.lock().expect("lock registry poisoned");
        if let Some(existing) = registry.get(&key) {
            if Arc::strong_count(existing) == 1 {
                registry.remove(&key);
            }
        }

        result
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn same_key_serialises_producers() {
        let locks = Arc::new(KeyedLocks::new());
        let produced = Arc::new(AtomicUsize::new(0));
        let cache: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let produced = Arc::clone(&produced);
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                locks.with("key".to_string(), || {
                    let mut slot = cache.lock().unwrap();
                    if slot.is_none() {
                        produced.fetch_add(1, Ordering::SeqCst);
                        *slot = Some(42);
                    }
                    slot.unwrap()
                })
            }));
        }

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        // Exactly one thread produced; the rest observed the value.
        assert_eq!(produced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_run_concurrently() {
        let locks = Arc::new(KeyedLocks::new());
        let locks2 = Arc::clone(&locks);

        let inner = thread::spawn(move || locks2.with("b".to_string(), || 2));
        let outer = locks.with("a".to_string(), || {
            // Holding "a" must not block "b".
            inner.join().unwrap()
        });
        assert_eq!(outer, 2);
    }

    #[test]
    fn registry_is_cleaned_up() {
        let locks = KeyedLocks::new();
        locks.with(1u32, || ());
        locks.with(2u32, || ());
        assert!(locks.registry.lock().unwrap().is_empty());
    }
}
