//! Inode table: bidirectional inode <-> virtual path mapping.
//!
//! Backed by DashMap for lock-free concurrent access from FUSE threads.
//! Real entries reuse the underlying filesystem inode when it is free;
//! synthesised entries (and collisions) take a hash of the virtual path.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::inode_entry::{InodeEntry, InodeNumber};

/// Hash a fully-qualified virtual path to a synthetic 64-bit inode id.
pub fn synthetic_ino(vpath: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(vpath.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let ino = u64::from_le_bytes(bytes);
    // Keep clear of the reserved root inode.
    if ino <= InodeNumber::ROOT.get() {
        ino + 2
    } else {
        ino
    }
}

/// Bidirectional inode table. The root entry is present from construction.
pub struct InodeTable {
    by_ino: DashMap<u64, Arc<InodeEntry>>,
    by_path: DashMap<String, u64>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            by_ino: DashMap::new(),
            by_path: DashMap::new(),
        };
        let root = Arc::new(InodeEntry::root());
        table.by_path.insert(String::new(), root.ino.get());
        table.by_ino.insert(root.ino.get(), root);
        table
    }

    pub fn get(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        self.by_ino.get(&ino).map(|r| Arc::clone(&r))
    }

    pub fn get_by_path(&self, vpath: &str) -> Option<Arc<InodeEntry>> {
        let ino = *self.by_path.get(vpath)?;
        self.get(ino)
    }

    /// The inode id a path would be advertised under before lookup: the
    /// interned id if present, a path hash otherwise.
    pub fn advertised_ino(&self, vpath: &str) -> u64 {
        self.by_path
            .get(vpath)
            .map(|r| *r)
            .unwrap_or_else(|| synthetic_ino(vpath))
    }

    /// Get or create the entry for `vpath`. `preferred` is the backing
    /// filesystem inode of real entries; it is used unless another path
    /// already claimed it.
    pub fn intern(
        &self,
        vpath: &str,
        preferred: Option<u64>,
        build: impl FnOnce(InodeNumber) -> InodeEntry,
    ) -> Arc<InodeEntry> {
        if let Some(existing) = self.get_by_path(vpath) {
            return existing;
        }

        let ino = self.pick_ino(vpath, preferred);
        let entry = Arc::new(build(InodeNumber::new(ino)));

        // Publish under by_ino first so a racing intern of the same path
        // always finds the winner's entry; first by_path insertion wins.
        self.by_ino.insert(ino, Arc::clone(&entry));
        match self.by_path.entry(vpath.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let winner_ino = *occupied.get();
                drop(occupied);
                if winner_ino != ino {
                    self.by_ino.remove(&ino);
                }
                self.get(winner_ino).unwrap_or(entry)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ino);
                entry
            }
        }
    }

    /// Remove an entry once the kernel has fully forgotten it.
    pub fn remove(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        let (_, entry) = self.by_ino.remove(&ino)?;
        self.by_path.remove(&entry.vpath);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }

    /// Choose an id: the preferred (real) inode when free, otherwise the
    /// path hash, probed linearly on collision.
    fn pick_ino(&self, vpath: &str, preferred: Option<u64>) -> u64 {
        if let Some(ino) = preferred {
            if ino > InodeNumber::ROOT.get() && !self.by_ino.contains_key(&ino) {
                return ino;
            }
        }
        let mut ino = synthetic_ino(vpath);
        while self.by_ino.contains_key(&ino) {
            ino = ino.wrapping_add(1).max(2);
        }
        ino
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
