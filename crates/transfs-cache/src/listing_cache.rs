//! Generic listing cache.
//!
//! Entries are keyed by a path string and validated against the backing
//! file's `(mtime_ns, size)`; a key whose validator no longer matches is
//! treated as a miss and repopulated. Lookups read through a lock-free map;
//! population is single-flight per key. When a cache directory is
//! configured, entries spill to JSON files named by the SHA-256 of the key
//! path in a two-level layout, and are read back on later runs if the
//! validator still matches.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use transfs_core::sync::KeyedLocks;

/// Identity of one cached listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Physical path the listing was produced from. Archive-internal
    /// listings append `!<subpath>` to the archive path.
    pub path: String,
    pub mtime_ns: u128,
    pub size: u64,
}

impl CacheKey {
    /// Build a key from a filesystem path by statting it.
    pub fn for_path(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self::from_metadata(path.display().to_string(), &meta))
    }

    /// Build a key from an already-statted metadata, under an arbitrary
    /// key label (used for archive-internal listings).
    pub fn from_metadata(path: String, meta: &fs::Metadata) -> Self {
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            path,
            mtime_ns,
            size: meta.len(),
        }
    }
}

struct MemoryEntry<T> {
    mtime_ns: u128,
    size: u64,
    value: Arc<T>,
}

#[derive(Serialize, Deserialize)]
struct DiskEntry<T> {
    path: String,
    mtime_ns: u128,
    size: u64,
    value: T,
}

/// In-memory LRU over on-disk JSON entries.
pub struct ListingCache<T> {
    memory: DashMap<String, MemoryEntry<T>>,
    recency: Mutex<VecDeque<String>>,
    capacity: usize,
    disk_dir: Option<PathBuf>,
    flights: KeyedLocks<String>,
}

impl<T> ListingCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a cache holding up to `capacity` listings in memory,
    /// spilling to `disk_dir` when given.
    pub fn new(capacity: usize, disk_dir: Option<PathBuf>) -> std::io::Result<Self> {
        if let Some(dir) = &disk_dir {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            memory: DashMap::new(),
            recency: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            disk_dir,
            flights: KeyedLocks::new(),
        })
    }

    /// Fetch the listing for `key`, producing it at most once across
    /// concurrent callers when absent or stale.
    pub fn get_or_populate<E, F>(&self, key: &CacheKey, produce: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.memory_hit(key) {
            return Ok(hit);
        }

        self.flights.with(key.path.clone(), || {
            // Losers of the population race find the entry on re-check.
            if let Some(hit) = self.memory_hit(key) {
                return Ok(hit);
            }
            if let Some(value) = self.disk_hit(key) {
                let value = Arc::new(value);
                self.insert_memory(key, Arc::clone(&value));
                return Ok(value);
            }

            let value = Arc::new(produce()?);
            self.insert_memory(key, Arc::clone(&value));
            self.store_disk(key, &value);
            Ok(value)
        })
    }

    /// Number of listings currently held in memory.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    fn memory_hit(&self, key: &CacheKey) -> Option<Arc<T>> {
        let entry = self.memory.get(&key.path)?;
        if entry.mtime_ns != key.mtime_ns || entry.size != key.size {
            return None;
        }
        let value = Arc::clone(&entry.value);
        drop(entry);
        self.touch(&key.path);
        Some(value)
    }

    fn insert_memory(&self, key: &CacheKey, value: Arc<T>) {
        self.memory.insert(
            key.path.clone(),
            MemoryEntry {
                mtime_ns: key.mtime_ns,
                size: key.size,
                value,
            },
        );
        self.touch(&key.path);
        self.evict_over_capacity();
    }

    fn touch(&self, path: &str) {
        let mut recency = self.recency.lock().expect("recency lock poisoned");
        recency.retain(|p| p != path);
        recency.push_front(path.to_string());
    }

    fn evict_over_capacity(&self) {
        let mut recency = self.recency.lock().expect("recency lock poisoned");
        while recency.len() > self.capacity {
            if let Some(oldest) = recency.pop_back() {
                debug!(path = %oldest, "evicting listing from memory");
                self.memory.remove(&oldest);
            }
        }
    }

    fn disk_path(&self, path: &str) -> Option<PathBuf> {
        let dir = self.disk_dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        let (prefix, rest) = hash.split_at(2);
        Some(dir.join(prefix).join(rest))
    }

    fn disk_hit(&self, key: &CacheKey) -> Option<T> {
        let path = self.disk_path(&key.path)?;
        let text = fs::read_to_string(&path).ok()?;
        let entry: DiskEntry<T> = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "discarding unreadable cache entry");
                return None;
            }
        };
        if entry.path != key.path || entry.mtime_ns != key.mtime_ns || entry.size != key.size {
            return None;
        }
        Some(entry.value)
    }

    fn store_disk(&self, key: &CacheKey, value: &T) {
        let Some(path) = self.disk_path(&key.path) else {
            return;
        };
        if let Err(e) = self.try_store_disk(key, value, &path) {
            warn!(file = %path.display(), error = %e, "failed to persist cache entry");
        }
    }

    fn try_store_disk(&self, key: &CacheKey, value: &T, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string(&SerializeRef {
            path: &key.path,
            mtime_ns: key.mtime_ns,
            size: key.size,
            value,
        })
        .map_err(std::io::Error::other)?;
        fs::write(path, text)
    }
}

/// Borrow-friendly twin of [`DiskEntry`] for serialisation.
#[derive(Serialize)]
struct SerializeRef<'a, T> {
    path: &'a str,
    mtime_ns: u128,
    size: u64,
    value: &'a T,
}
