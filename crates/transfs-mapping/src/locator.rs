//! Source location: turning a resolution into a definite existence answer.
//!
//! Missing physical paths are clean negatives (`Ok(None)`), not errors;
//! only genuine I/O failures propagate.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::resolver::Resolution;
use crate::{Engine, ResolveError};

/// File or directory, as the kernel sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatedKind {
    File,
    Dir,
}

/// The authoritative answer for one virtual path.
#[derive(Debug, Clone)]
pub struct Located {
    pub kind: LocatedKind,
    pub size: u64,
    pub mtime: SystemTime,
    /// Backing filesystem inode for real entries, reused by the FUSE layer
    /// where it does not collide.
    pub real_ino: Option<u64>,
    pub resolution: Resolution,
}

impl Located {
    /// A synthesised directory: config-defined levels and dynamic folders.
    /// Attributes are fixed so repeated stats are identical.
    pub fn synth_dir() -> Self {
        Self {
            kind: LocatedKind::Dir,
            size: 0,
            mtime: UNIX_EPOCH,
            real_ino: None,
            resolution: Resolution::SynthDir,
        }
    }

    /// A member file inside an archive; mtime is the archive's.
    pub fn archive_member(archive: &Path, member: String, size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: LocatedKind::File,
            size,
            mtime,
            real_ino: None,
            resolution: Resolution::ArchiveMember {
                archive: archive.to_path_buf(),
                member,
            },
        }
    }

    /// A directory level inside an archive (or its root).
    pub fn archive_dir(archive: &Path, subpath: String, mtime: SystemTime) -> Self {
        Self {
            kind: LocatedKind::Dir,
            size: 0,
            mtime,
            real_ino: None,
            resolution: Resolution::ArchiveDir {
                archive: archive.to_path_buf(),
                subpath,
            },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == LocatedKind::Dir
    }
}

impl Engine {
    /// Stat a real path, following symlinks. Missing targets (including
    /// dangling symlinks) are negatives.
    pub(crate) fn locate_real(&self, path: &Path) -> Result<Option<Located>, ResolveError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
        let located = if meta.is_dir() {
            Located {
                kind: LocatedKind::Dir,
                size: 0,
                mtime,
                real_ino: Some(meta.ino()),
                resolution: Resolution::RealDir(path.to_path_buf()),
            }
        } else {
            Located {
                kind: LocatedKind::File,
                size: meta.len(),
                mtime,
                real_ino: Some(meta.ino()),
                resolution: Resolution::RealFile(path.to_path_buf()),
            }
        };
        Ok(Some(located))
    }

    /// Like [`locate_real`], but only accepts a regular file.
    pub(crate) fn locate_real_file(&self, path: &Path) -> Result<Option<Located>, ResolveError> {
        Ok(self
            .locate_real(path)?
            .filter(|located| located.kind == LocatedKind::File))
    }
}
