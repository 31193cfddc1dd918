//! Snapshot cache and member access.
//!
//! Snapshots are cached per archive path and revalidated against the file's
//! `(mtime, size)`. Indexing is single-flight: concurrent first opens of the
//! same archive perform one scan.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tempfile::NamedTempFile;
use tracing::debug;
use transfs_core::sync::KeyedLocks;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::{ArchiveError, ArchiveSnapshot};

/// Cache of archive snapshots keyed by physical path.
pub struct ArchiveIndex {
    snapshots: DashMap<PathBuf, Arc<ArchiveSnapshot>>,
    flights: KeyedLocks<PathBuf>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            flights: KeyedLocks::new(),
        }
    }

    /// The snapshot for `path`, indexing on first use and re-indexing when
    /// the backing file's `(mtime, size)` changed.
    pub fn snapshot(&self, path: &Path) -> Result<Arc<ArchiveSnapshot>, ArchiveError> {
        let meta = std::fs::metadata(path).map_err(|e| ArchiveError::io(path, e))?;
        let mtime = meta.modified().map_err(|e| ArchiveError::io(path, e))?;
        let size = meta.len();

        if let Some(snap) = self.snapshots.get(path) {
            if snap.matches(mtime, size) {
                return Ok(Arc::clone(&snap));
            }
        }

        self.flights.with(path.to_path_buf(), || {
            // Re-check under the flight lock: a concurrent indexer may have
            // populated the entry while we waited.
            if let Some(snap) = self.snapshots.get(path) {
                if snap.matches(mtime, size) {
                    return Ok(Arc::clone(&snap));
                }
            }
            debug!(archive = %path.display(), "indexing archive");
            let snap = Arc::new(ArchiveSnapshot::index(path)?);
            self.snapshots.insert(path.to_path_buf(), Arc::clone(&snap));
            Ok(snap)
        })
    }

    /// Drop the cached snapshot for `path`, if any.
    pub fn evict(&self, path: &Path) {
        self.snapshots.remove(path);
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Read up to `size` bytes of a member starting at `offset`,
    /// decompressing and discarding the prefix. Reads past EOF return an
    /// empty buffer.
    pub fn read_member(
        &self,
        snapshot: &ArchiveSnapshot,
        member: &str,
        offset: u64,
        size: u32,
    ) -> Result<Vec<u8>, ArchiveError> {
        with_member(snapshot.archive_path(), member, |entry| {
            io::copy(&mut (&mut *entry).take(offset), &mut io::sink())?;
            let mut buf = Vec::with_capacity(size as usize);
            (&mut *entry).take(size as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    /// Materialise a member into a uniquely named temp file. The caller
    /// owns the file; dropping it deletes the path.
    pub fn extract(
        &self,
        snapshot: &ArchiveSnapshot,
        member: &str,
    ) -> Result<NamedTempFile, ArchiveError> {
        let path = snapshot.archive_path();
        let mut temp = NamedTempFile::new().map_err(|e| ArchiveError::io(path, e))?;
        with_member(path, member, |entry| {
            io::copy(entry, temp.as_file_mut()).map(|_| ())
        })?;
        debug!(
            archive = %path.display(),
            member,
            temp = %temp.path().display(),
            "extracted archive member"
        );
        Ok(temp)
    }

    /// Extract a member and hand back an anonymous descriptor: the temp
    /// path is unlinked before returning, so the kernel reclaims the bytes
    /// when the descriptor closes.
    pub fn extract_unlinked(
        &self,
        snapshot: &ArchiveSnapshot,
        member: &str,
    ) -> Result<File, ArchiveError> {
        let temp = self.extract(snapshot, member)?;
        let file = temp
            .reopen()
            .map_err(|e| ArchiveError::io(snapshot.archive_path(), e))?;
        drop(temp);
        Ok(file)
    }
}

impl Default for ArchiveIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` over a decompressing reader positioned at the start of `member`.
fn with_member<R>(
    path: &Path,
    member: &str,
    f: impl FnOnce(&mut dyn Read) -> io::Result<R>,
) -> Result<R, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::malformed(path, e))?;
    let mut entry = match zip.by_name(member) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(ArchiveError::MemberNotFound {
                path: path.display().to_string(),
                member: member.to_string(),
            })
        }
        Err(e) => return Err(ArchiveError::malformed(path, e)),
    };
    f(&mut entry).map_err(|e| ArchiveError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    fn write_zip(dir: &Path, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (member, content) in members {
            writer
                .start_file(member.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    #[test]
    fn snapshot_is_cached_and_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "a.zip", &[("x.ssd", b"data")]);
        let index = ArchiveIndex::new();

        let first = index.snapshot(&path).unwrap();
        let second = index.snapshot(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn snapshot_is_rebuilt_when_archive_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "a.zip", &[("x.ssd", b"data")]);
        let index = ArchiveIndex::new();

        let first = index.snapshot(&path).unwrap();

        // Rewrite with different content and a deliberately different mtime.
        write_zip(tmp.path(), "a.zip", &[("y.ssd", b"other-bytes")]);
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        let file = File::options().append(true).open(&path).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let second = index.snapshot(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.member_size("y.ssd").is_some());
        assert!(second.member_size("x.ssd").is_none());
    }

    #[test]
    fn read_member_at_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "a.zip", &[("hello.bin", b"HELLOWORLD")]);
        let index = ArchiveIndex::new();
        let snap = index.snapshot(&path).unwrap();

        assert_eq!(index.read_member(&snap, "hello.bin", 0, 5).unwrap(), b"HELLO");
        assert_eq!(index.read_member(&snap, "hello.bin", 5, 100).unwrap(), b"WORLD");
        assert!(index.read_member(&snap, "hello.bin", 100, 5).unwrap().is_empty());
    }

    #[test]
    fn missing_member_is_a_clean_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "a.zip", &[("x.ssd", b"x")]);
        let index = ArchiveIndex::new();
        let snap = index.snapshot(&path).unwrap();
        assert!(matches!(
            index.read_member(&snap, "nope.ssd", 0, 1),
            Err(ArchiveError::MemberNotFound { .. })
        ));
    }

    #[test]
    fn extract_unlinked_survives_temp_removal() {
        use std::os::unix::fs::FileExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "a.zip", &[("elite.ssd", b"ELITEDATA")]);
        let index = ArchiveIndex::new();
        let snap = index.snapshot(&path).unwrap();

        let file = index.extract_unlinked(&snap, "elite.ssd").unwrap();
        let mut buf = [0u8; 5];
        let n = file.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"ELITE");
    }

    #[test]
    fn concurrent_snapshots_return_the_same_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_zip(tmp.path(), "big.zip", &[("a.ssd", b"a"), ("b.ssd", b"b")]);
        let index = Arc::new(ArchiveIndex::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = Arc::clone(&index);
            let path = path.clone();
            handles.push(thread::spawn(move || index.snapshot(&path).unwrap()));
        }
        let snapshots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(index.len(), 1);
        for snap in &snapshots {
            assert!(Arc::ptr_eq(snap, &snapshots[0]));
            assert_eq!(snap.member_size("a.ssd"), Some(1));
        }
    }
}
