//! Archive snapshots.
//!
//! A snapshot is built once per `(path, mtime, size)` and holds the member
//! table plus the directory set synthesised from member paths, so archives
//! without explicit directory entries still browse correctly.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;
use zip::ZipArchive;

use crate::ArchiveError;

/// One level of an archive's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveListing {
    /// Immediate subdirectory names.
    pub dirs: Vec<String>,
    /// Immediate files as `(name, uncompressed_size)`.
    pub files: Vec<(String, u64)>,
}

/// The indexed view of one archive file.
#[derive(Debug)]
pub struct ArchiveSnapshot {
    path: PathBuf,
    mtime: SystemTime,
    size: u64,
    /// Member path -> uncompressed size. Paths are `/`-separated, no
    /// leading or trailing slash.
    files: BTreeMap<String, u64>,
    /// All directories, explicit or synthesised from member paths.
    dirs: BTreeSet<String>,
}

impl ArchiveSnapshot {
    /// Index the archive at `path`. Hidden members are dropped silently;
    /// members that are absolute or escape via `..` are dropped with a
    /// warning.
    pub fn index(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        let meta = file.metadata().map_err(|e| ArchiveError::io(path, e))?;
        let mtime = meta.modified().map_err(|e| ArchiveError::io(path, e))?;
        let size = meta.len();

        let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::malformed(path, e))?;

        let mut files = BTreeMap::new();
        let mut dirs = BTreeSet::new();

        for i in 0..zip.len() {
            let entry = zip
                .by_index(i)
                .map_err(|e| ArchiveError::malformed(path, e))?;
            let raw_name = entry.name().to_string();
            let is_dir = entry.is_dir();
            let member_size = entry.size();
            drop(entry);

            let normalized = match normalize_member(&raw_name) {
                MemberName::Ok(n) => n,
                MemberName::Hidden => continue,
                MemberName::Unsafe => {
                    warn!(archive = %path.display(), member = %raw_name, "rejecting traversal-escaping archive member");
                    continue;
                }
            };
            if normalized.is_empty() {
                continue;
            }

            if is_dir {
                dirs.insert(normalized.clone());
            } else {
                files.insert(normalized.clone(), member_size);
            }
            // Synthesise every ancestor directory.
            let mut prefix = normalized.as_str();
            while let Some(idx) = prefix.rfind('/') {
                prefix = &prefix[..idx];
                dirs.insert(prefix.to_string());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            mtime,
            size,
            files,
            dirs,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.path
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn archive_size(&self) -> u64 {
        self.size
    }

    /// Whether the backing file still matches this snapshot.
    pub fn matches(&self, mtime: SystemTime, size: u64) -> bool {
        self.mtime == mtime && self.size == size
    }

    /// Uncompressed size of a member file, if present.
    pub fn member_size(&self, member: &str) -> Option<u64> {
        self.files.get(member).copied()
    }

    /// Whether the given subpath is a directory (explicit or synthesised).
    /// The empty subpath is the archive root and always a directory.
    pub fn is_dir(&self, subpath: &str) -> bool {
        subpath.is_empty() || self.dirs.contains(subpath)
    }

    /// All member file paths with sizes, in path order.
    pub fn members(&self) -> impl Iterator<Item = (&str, u64)> {
        self.files.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The first member whose basename equals `basename`, in path order.
    pub fn find_member(&self, basename: &str) -> Option<&str> {
        self.files
            .keys()
            .find(|k| basename_of(k) == basename)
            .map(|k| k.as_str())
    }

    /// List one level below `subpath` (empty lists the root). Returns None
    /// when the subpath is not a directory of this archive.
    pub fn list(&self, subpath: &str) -> Option<ArchiveListing> {
        if !self.is_dir(subpath) {
            return None;
        }
        let prefix = if subpath.is_empty() {
            String::new()
        } else {
            format!("{subpath}/")
        };

        let dirs = self
            .dirs
            .iter()
            .filter_map(|d| direct_child(d, &prefix))
            .map(str::to_string)
            .collect();
        let files = self
            .files
            .iter()
            .filter_map(|(f, size)| direct_child(f, &prefix).map(|name| (name.to_string(), *size)))
            .collect();

        Some(ArchiveListing { dirs, files })
    }
}

enum MemberName {
    Ok(String),
    Hidden,
    Unsafe,
}

/// Normalise a raw member name: strip the trailing slash of directory
/// entries, classify hidden and escaping names.
fn normalize_member(raw: &str) -> MemberName {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with('/') || trimmed.contains('\\') {
        return MemberName::Unsafe;
    }
    for component in trimmed.split('/') {
        if component.is_empty() || component.starts_with("..") {
            return MemberName::Unsafe;
        }
        if component.starts_with('.') {
            return MemberName::Hidden;
        }
    }
    MemberName::Ok(trimmed.to_string())
}

fn basename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// If `path` is a direct child of `prefix`, return its name.
fn direct_child<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}
