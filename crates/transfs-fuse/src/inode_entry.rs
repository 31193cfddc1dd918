//! Inode entry representation.
//!
//! Each entry binds one kernel inode to one virtual path and remembers how
//! the path is backed. Reference counts track kernel lookups and open
//! handles with atomics so concurrent FUSE threads never lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use fuser::{FileAttr, FileType};
use std::path::PathBuf;
use transfs_mapping::{Located, LocatedKind, Resolution};

/// Newtype for FUSE inode numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeNumber(u64);

impl InodeNumber {
    /// Root inode, always 1 per FUSE convention.
    pub const ROOT: InodeNumber = InodeNumber(1);

    pub fn new(val: u64) -> Self {
        InodeNumber(val)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an inode's content is produced.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Exists only in the virtual tree.
    Synth,
    /// Passthrough to a physical file.
    RealFile(PathBuf),
    /// Passthrough to a physical directory.
    RealDir(PathBuf),
    /// Member file inside an archive.
    ArchiveMember { archive: PathBuf, member: String },
    /// Directory level inside an archive.
    ArchiveDir { archive: PathBuf, subpath: String },
}

impl From<Resolution> for Backing {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::SynthDir => Backing::Synth,
            Resolution::RealFile(path) => Backing::RealFile(path),
            Resolution::RealDir(path) => Backing::RealDir(path),
            Resolution::ArchiveMember { archive, member } => {
                Backing::ArchiveMember { archive, member }
            }
            Resolution::ArchiveDir { archive, subpath } => {
                Backing::ArchiveDir { archive, subpath }
            }
        }
    }
}

/// Directory permission bits for every directory in the mount.
pub const DIR_PERM: u16 = 0o555;
/// File permission bits for every file in the mount.
pub const FILE_PERM: u16 = 0o444;

/// In-memory state of one kernel-visible inode.
#[derive(Debug)]
pub struct InodeEntry {
    pub ino: InodeNumber,
    /// Fully-qualified virtual path; empty for the root.
    pub vpath: String,
    pub kind: FileType,
    pub backing: Backing,
    pub size: u64,
    pub mtime: SystemTime,

    /// Kernel reference count, driven by lookup/forget.
    lookup_count: AtomicU64,
    /// Open file handles on this inode.
    open_handles: AtomicU64,
}

impl InodeEntry {
    pub fn new(ino: InodeNumber, vpath: String, located: &Located) -> Self {
        let kind = match located.kind {
            LocatedKind::Dir => FileType::Directory,
            LocatedKind::File => FileType::RegularFile,
        };
        Self {
            ino,
            vpath,
            kind,
            backing: Backing::from(located.resolution.clone()),
            size: located.size,
            mtime: located.mtime,
            lookup_count: AtomicU64::new(0),
            open_handles: AtomicU64::new(0),
        }
    }

    /// The root directory entry for the mount point itself.
    pub fn root() -> Self {
        Self {
            ino: InodeNumber::ROOT,
            vpath: String::new(),
            kind: FileType::Directory,
            backing: Backing::Synth,
            size: 0,
            mtime: std::time::UNIX_EPOCH,
            lookup_count: AtomicU64::new(0),
            open_handles: AtomicU64::new(0),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    /// FUSE attributes for this entry. The mount is read-only: 0555
    /// directories, 0444 files, ownership of the mounting process.
    pub fn to_file_attr(&self, uid: u32, gid: u32) -> FileAttr {
        let perm = if self.is_dir() { DIR_PERM } else { FILE_PERM };
        let nlink = if self.is_dir() { 2 } else { 1 };
        FileAttr {
            ino: self.ino.get(),
            size: self.size,
            blocks: self.size.div_ceil(512),
            atime: self.mtime,
            mtime: self.mtime,
            ctime: self.mtime,
            crtime: self.mtime,
            kind: self.kind,
            perm,
            nlink,
            uid,
            gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    pub fn increment_lookup(&self) {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement by `count`, returning the new value.
    pub fn decrement_lookup_by(&self, count: u64) -> u64 {
        self.lookup_count.fetch_sub(count, Ordering::SeqCst) - count
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    pub fn increment_open_handles(&self) {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement, returning the new value.
    pub fn decrement_open_handles(&self) -> u64 {
        self.open_handles.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn open_handles(&self) -> u64 {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Whether the entry can be dropped from the table: no kernel
    /// references and no open handles.
    pub fn is_released(&self) -> bool {
        self.lookup_count.load(Ordering::SeqCst) == 0
            && self.open_handles.load(Ordering::SeqCst) == 0
    }
}
