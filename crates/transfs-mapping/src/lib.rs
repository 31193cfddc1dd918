//! Virtual-to-physical mapping for TransFS.
//!
//! The [`Engine`] owns the archive index and the listing cache and exposes
//! the two operations the FUSE layer builds everything on: resolve one
//! virtual path to its authoritative physical location, and materialise the
//! listing of one virtual directory.

pub mod listing;
pub mod locator;
pub mod resolver;
mod scan;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use transfs_archive::{ArchiveError, ArchiveIndex};
use transfs_cache::ListingCache;
use transfs_core::Config;

pub use listing::DirEntryOut;
pub use locator::{Located, LocatedKind};
pub use resolver::Resolution;
pub use scan::PhysEntry;

/// Errors raised while resolving or listing virtual paths.
///
/// A missing file or directory is *not* an error; resolution returns
/// `Ok(None)` for clean negatives.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ResolveError {
    /// Whether the underlying cause is an OS permission refusal.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            ResolveError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            ResolveError::Archive(ArchiveError::Io { source, .. }) => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Default number of directory listings held in memory.
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// The mapping engine: configuration plus the caches behind it.
pub struct Engine {
    config: Arc<Config>,
    archives: ArchiveIndex,
    scans: ListingCache<Vec<PhysEntry>>,
}

impl Engine {
    /// Build an engine over `config`. The listing cache spills to the
    /// configured `cache_dir` when present.
    pub fn new(config: Arc<Config>) -> std::io::Result<Self> {
        let disk_dir: Option<PathBuf> = config
            .cache_dir
            .as_ref()
            .map(|dir| dir.join("listings"));
        Ok(Self {
            config,
            archives: ArchiveIndex::new(),
            scans: ListingCache::new(DEFAULT_CACHE_CAPACITY, disk_dir)?,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn archives(&self) -> &ArchiveIndex {
        &self.archives
    }

    /// Extract an archive member to an already-unlinked descriptor for an
    /// open handle.
    pub fn open_member(
        &self,
        archive: &std::path::Path,
        member: &str,
    ) -> Result<std::fs::File, ResolveError> {
        let snapshot = self.archives.snapshot(archive)?;
        Ok(self.archives.extract_unlinked(&snapshot, member)?)
    }
}
