//! FUSE filesystem implementation.
//!
//! Implements `fuser::Filesystem` for TransFS: read-side operations walk
//! the mapping engine, every mutating operation answers EROFS. Entries are
//! interned into the inode table on lookup and dropped on forget; open
//! archive members live as unlinked extracted descriptors until release.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr,
    Request, TimeOrNow,
};
use tracing::{debug, warn};
use transfs_mapping::Engine;

use crate::error::FsError;
use crate::handle::{DirHandle, OpenHandle};
use crate::inode::InodeTable;
use crate::inode_entry::{Backing, InodeEntry, InodeNumber, DIR_PERM, FILE_PERM};

/// TTL for kernel attribute caching.
const TTL: Duration = Duration::from_secs(1);

/// FUSE open flag: the kernel may keep cached data across opens. The
/// mount is read-only, so cached pages never go stale within an open.
const FOPEN_KEEP_CACHE: u32 = 1 << 1;

/// POSIX NAME_MAX.
const NAME_MAX: usize = 255;

/// The TransFS filesystem state.
///
/// One instance owns the inode table and the open-handle tables; the
/// mapping engine (with its caches) is shared.
pub struct TransFs {
    engine: Arc<Engine>,
    inodes: InodeTable,
    files: DashMap<u64, OpenHandle>,
    dirs: DashMap<u64, DirHandle>,
    next_fh: AtomicU64,
    uid: u32,
    gid: u32,
}

impl TransFs {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            inodes: InodeTable::new(),
            files: DashMap::new(),
            dirs: DashMap::new(),
            next_fh: AtomicU64::new(1),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn child_vpath(parent: &InodeEntry, name: &str) -> String {
        format!("{}/{}", parent.vpath, name)
    }

    /// Current attributes for an entry. Real backings are re-statted so
    /// the kernel sees fresh sizes; permissions are always masked to
    /// read-only.
    fn current_attr(&self, entry: &InodeEntry) -> Result<FileAttr, libc::c_int> {
        match &entry.backing {
            Backing::RealFile(path) | Backing::RealDir(path) => {
                let meta = std::fs::metadata(path).map_err(|e| {
                    debug!(path = %path.display(), error = %e, "backing path vanished");
                    libc::c_int::from(FsError::from(e))
                })?;
                let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
                let (kind, perm, nlink, size) = if meta.is_dir() {
                    (FileType::Directory, DIR_PERM, 2, 0)
                } else {
                    (FileType::RegularFile, FILE_PERM, 1, meta.len())
                };
                Ok(FileAttr {
                    ino: entry.ino.get(),
                    size,
                    blocks: size.div_ceil(512),
                    atime: mtime,
                    mtime,
                    ctime: mtime,
                    crtime: mtime,
                    kind,
                    perm,
                    nlink,
                    uid: self.uid,
                    gid: self.gid,
                    rdev: 0,
                    blksize: 4096,
                    flags: 0,
                })
            }
            _ => Ok(entry.to_file_attr(self.uid, self.gid)),
        }
    }

    /// Resolve and intern one child of a directory entry.
    fn lookup_child(
        &self,
        parent: &InodeEntry,
        name: &str,
    ) -> Result<Arc<InodeEntry>, libc::c_int> {
        let vpath = Self::child_vpath(parent, name);
        let located = match self.engine.resolve(&vpath) {
            Ok(Some(located)) => located,
            Ok(None) => {
                debug!(path = %vpath, "lookup: no resolution, ENOENT");
                return Err(libc::ENOENT);
            }
            Err(e) => {
                warn!(path = %vpath, error = %e, "lookup failed");
                return Err(libc::c_int::from(FsError::from(e)));
            }
        };
        Ok(self.inodes.intern(&vpath, located.real_ino, |ino| {
            InodeEntry::new(ino, vpath.clone(), &located)
        }))
    }

    fn reject_write(&self, op: &str, ino: u64) -> libc::c_int {
        debug!(op, ino, "write operation on read-only mount, EROFS");
        libc::EROFS
    }
}

impl Filesystem for TransFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!(
            clients = self.engine.config().clients.len(),
            filestore = %self.engine.config().filestore.display(),
            "TransFS initialised"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!(
            inodes = self.inodes.len(),
            open_files = self.files.len(),
            "TransFS shutting down"
        );
        // Open handles own unlinked descriptors; dropping the tables
        // releases everything.
        self.files.clear();
        self.dirs.clear();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        if name.len() > NAME_MAX {
            reply.error(libc::ENAMETOOLONG);
            return;
        }
        let Some(parent_entry) = self.inodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !parent_entry.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }

        match self.lookup_child(&parent_entry, name) {
            Ok(entry) => match self.current_attr(&entry) {
                Ok(attr) => {
                    entry.increment_lookup();
                    reply.entry(&TTL, &attr, 0);
                }
                Err(errno) => reply.error(errno),
            },
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        if ino == InodeNumber::ROOT.get() {
            return;
        }
        if let Some(entry) = self.inodes.get(ino) {
            let remaining = entry.decrement_lookup_by(nlookup);
            if remaining == 0 && entry.is_released() {
                self.inodes.remove(ino);
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.current_attr(&entry) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => {
                debug!(path = %entry.vpath, errno, "getattr failed");
                reply.error(errno);
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !entry.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }

        // Materialise the listing once; readdir slices it by offset so
        // kernel pagination stays stable.
        let entries = match self.engine.list(&entry.vpath) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                debug!(path = %entry.vpath, "opendir: directory vanished, ENOENT");
                reply.error(libc::ENOENT);
                return;
            }
            Err(e) => {
                warn!(path = %entry.vpath, error = %e, "opendir: listing failed");
                reply.error(libc::c_int::from(FsError::from(e)));
                return;
            }
        };

        let fh = self.alloc_fh();
        self.dirs.insert(fh, DirHandle { entries });
        reply.opened(fh, FOPEN_KEEP_CACHE);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(handle) = self.dirs.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut current: i64 = 0;

        if offset <= current {
            current += 1;
            if reply.add(ino, current, FileType::Directory, OsStr::new(".")) {
                reply.ok();
                return;
            }
        } else {
            current += 1;
        }

        if offset <= current {
            current += 1;
            // ".." of the root is the root itself.
            let parent_ino = if ino == InodeNumber::ROOT.get() {
                ino
            } else {
                let parent_vpath = match entry.vpath.rfind('/') {
                    Some(idx) => &entry.vpath[..idx],
                    None => "",
                };
                self.inodes.advertised_ino(parent_vpath)
            };
            if reply.add(parent_ino, current, FileType::Directory, OsStr::new("..")) {
                reply.ok();
                return;
            }
        } else {
            current += 1;
        }

        for child in &handle.entries {
            if offset <= current {
                current += 1;
                let child_vpath = Self::child_vpath(&entry, &child.name);
                let child_ino = self.inodes.advertised_ino(&child_vpath);
                let kind = if child.is_dir {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                if reply.add(child_ino, current, kind, OsStr::new(&child.name)) {
                    break;
                }
            } else {
                current += 1;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.dirs.remove(&fh);
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if entry.is_dir() {
            reply.error(libc::EISDIR);
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0 {
            reply.error(self.reject_write("open", ino));
            return;
        }

        let handle = match &entry.backing {
            Backing::RealFile(path) => match File::open(path) {
                Ok(file) => OpenHandle::Real(file),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "open: backing file unavailable");
                    reply.error(libc::c_int::from(FsError::from(e)));
                    return;
                }
            },
            Backing::ArchiveMember { archive, member } => {
                match self.engine.open_member(archive, member) {
                    Ok(file) => OpenHandle::Extracted(file),
                    Err(e) => {
                        warn!(
                            archive = %archive.display(),
                            member,
                            error = %e,
                            "open: member extraction failed"
                        );
                        reply.error(libc::c_int::from(FsError::from(e)));
                        return;
                    }
                }
            }
            Backing::Synth | Backing::RealDir(_) | Backing::ArchiveDir { .. } => {
                reply.error(libc::EISDIR);
                return;
            }
        };

        entry.increment_open_handles();
        let fh = self.alloc_fh();
        self.files.insert(fh, handle);
        debug!(path = %entry.vpath, fh, "opened");
        reply.opened(fh, FOPEN_KEEP_CACHE);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.files.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match handle.read_at(offset as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(ino, fh, error = %e, "read failed");
                reply.error(libc::EIO);
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.files.remove(&fh);
        if let Some(entry) = self.inodes.get(ino) {
            let remaining = entry.decrement_open_handles();
            if remaining == 0 && entry.is_released() && ino != InodeNumber::ROOT.get() {
                self.inodes.remove(ino);
            }
        }
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(_entry) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if mask & libc::W_OK != 0 {
            reply.error(libc::EROFS);
            return;
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        use std::os::unix::ffi::OsStrExt;

        let filestore = &self.engine.config().filestore;
        let Ok(c_path) = CString::new(filestore.as_os_str().as_bytes()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            reply.error(errno);
            return;
        }
        reply.statfs(
            stats.f_blocks,
            stats.f_bfree,
            stats.f_bavail,
            stats.f_files,
            stats.f_ffree,
            stats.f_bsize as u32,
            NAME_MAX as u32,
            stats.f_frsize as u32,
        );
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        // A translation layer carries no extended attributes.
        reply.error(libc::ENODATA);
    }

    // ------------------------------------------------------------------
    // Mutating operations: the whole mount is read-only.
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(self.reject_write("setattr", ino));
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(self.reject_write("mknod", parent));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(self.reject_write("mkdir", parent));
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.reject_write("unlink", parent));
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.reject_write("rmdir", parent));
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(self.reject_write("symlink", parent));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.reject_write("rename", parent));
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(self.reject_write("link", ino));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(self.reject_write("create", parent));
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(self.reject_write("write", ino));
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.reject_write("setxattr", ino));
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.reject_write("removexattr", ino));
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use transfs_core::Config;

    use super::*;

    fn fixture() -> (tempfile::TempDir, TransFs) {
        let tmp = tempfile::tempdir().unwrap();
        let filestore = tmp.path().join("filestore");
        let hds = filestore.join("Native/Acorn/Atom/Software/HDs");
        fs::create_dir_all(&hds).unwrap();
        fs::write(hds.join("hoglet.vhd"), b"HELLOWORLD").unwrap();

        let yaml = format!(
            r#"
mountpoint: /mnt/transfs
filestore: {}
clients:
  - name: MiSTer
    systems:
      - name: AcornAtom
        local_base_path: Acorn/Atom
        maps:
          - HDs:
              source_dir: Software/HDs
"#,
            filestore.display()
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let engine = Arc::new(Engine::new(Arc::new(config)).unwrap());
        (tmp, TransFs::new(engine))
    }

    #[test]
    fn lookup_chain_interns_read_only_entries() {
        let (_tmp, tfs) = fixture();

        let root = tfs.inodes.get(InodeNumber::ROOT.get()).unwrap();
        let client = tfs.lookup_child(&root, "MiSTer").unwrap();
        assert!(client.is_dir());

        let system = tfs.lookup_child(&client, "AcornAtom").unwrap();
        let hds = tfs.lookup_child(&system, "HDs").unwrap();
        assert!(hds.is_dir());

        let file = tfs.lookup_child(&hds, "hoglet.vhd").unwrap();
        assert!(!file.is_dir());
        assert_eq!(file.size, 10);
        assert_eq!(file.vpath, "/MiSTer/AcornAtom/HDs/hoglet.vhd");

        let attr = tfs.current_attr(&file).unwrap();
        assert_eq!(attr.perm, FILE_PERM);
        assert_eq!(attr.size, 10);
        let attr = tfs.current_attr(&hds).unwrap();
        assert_eq!(attr.perm, DIR_PERM);
    }

    #[test]
    fn lookup_is_stable_across_calls() {
        let (_tmp, tfs) = fixture();
        let root = tfs.inodes.get(InodeNumber::ROOT.get()).unwrap();
        let a = tfs.lookup_child(&root, "MiSTer").unwrap();
        let b = tfs.lookup_child(&root, "MiSTer").unwrap();
        assert_eq!(a.ino, b.ino);
    }

    #[test]
    fn unknown_names_are_enoent() {
        let (_tmp, tfs) = fixture();
        let root = tfs.inodes.get(InodeNumber::ROOT.get()).unwrap();
        assert_eq!(tfs.lookup_child(&root, "NoSuchClient").unwrap_err(), libc::ENOENT);

        let client = tfs.lookup_child(&root, "MiSTer").unwrap();
        let system = tfs.lookup_child(&client, "AcornAtom").unwrap();
        let hds = tfs.lookup_child(&system, "HDs").unwrap();
        assert_eq!(tfs.lookup_child(&hds, "missing.vhd").unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn mutating_operations_map_to_erofs() {
        let (_tmp, tfs) = fixture();
        assert_eq!(tfs.reject_write("write", 5), libc::EROFS);
        assert_eq!(tfs.reject_write("mkdir", 1), libc::EROFS);
    }

    #[test]
    fn vanished_backing_fails_getattr_with_enoent() {
        let (tmp, tfs) = fixture();
        let root = tfs.inodes.get(InodeNumber::ROOT.get()).unwrap();
        let client = tfs.lookup_child(&root, "MiSTer").unwrap();
        let system = tfs.lookup_child(&client, "AcornAtom").unwrap();
        let hds = tfs.lookup_child(&system, "HDs").unwrap();
        let file = tfs.lookup_child(&hds, "hoglet.vhd").unwrap();

        fs::remove_file(
            tmp.path()
                .join("filestore/Native/Acorn/Atom/Software/HDs/hoglet.vhd"),
        )
        .unwrap();
        assert_eq!(tfs.current_attr(&file).unwrap_err(), libc::ENOENT);
    }
}
