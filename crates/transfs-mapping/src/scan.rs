//! Cached physical directory scans.
//!
//! Every readdir-shaped question about the physical store goes through
//! here, so large directories are scanned once per `(mtime, size)` and the
//! result is shared (and persisted) across requests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use transfs_cache::CacheKey;

use crate::{Engine, ResolveError};

/// One entry of a scanned physical directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

impl PhysEntry {
    /// Case-insensitive check for an archive suffix.
    pub fn is_zip(&self) -> bool {
        !self.is_dir && has_zip_suffix(&self.name)
    }
}

pub fn has_zip_suffix(name: &str) -> bool {
    name.len() > 4
        && name
            .get(name.len() - 4..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(".zip"))
}

impl Engine {
    /// Scan a physical directory through the listing cache. Returns None
    /// when the path is missing or not a directory; dotfiles are skipped.
    pub(crate) fn scan_dir(&self, path: &Path) -> Result<Option<Arc<Vec<PhysEntry>>>, ResolveError> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_dir() {
            return Ok(None);
        }

        let key = CacheKey::from_metadata(path.display().to_string(), &meta);
        let listing = self.scans.get_or_populate(&key, || scan_uncached(path))?;
        Ok(Some(listing))
    }

    /// List one level of an archive through the listing cache, keyed by
    /// `<archive>!<subpath>` and validated by the archive file itself.
    pub(crate) fn scan_archive(
        &self,
        archive: &Path,
        subpath: &str,
    ) -> Result<Option<Arc<Vec<PhysEntry>>>, ResolveError> {
        let snapshot = self.archives().snapshot(archive)?;
        let Some(listing) = snapshot.list(subpath) else {
            return Ok(None);
        };

        let meta = fs::metadata(archive)?;
        let key = CacheKey::from_metadata(format!("{}!{subpath}", archive.display()), &meta);
        let cached = self.scans.get_or_populate(&key, || {
            let mut entries: Vec<PhysEntry> = listing
                .dirs
                .iter()
                .map(|name| PhysEntry {
                    name: name.clone(),
                    is_dir: true,
                    size: 0,
                })
                .collect();
            entries.extend(listing.files.iter().map(|(name, size)| PhysEntry {
                name: name.clone(),
                is_dir: false,
                size: *size,
            }));
            Ok::<_, ResolveError>(entries)
        })?;
        Ok(Some(cached))
    }
}

fn scan_uncached(path: &Path) -> Result<Vec<PhysEntry>, ResolveError> {
    let mut entries = Vec::new();
    for dirent in fs::read_dir(path)? {
        let dirent = dirent?;
        let name = match dirent.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with('.') {
            continue;
        }
        let meta = match dirent.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        entries.push(PhysEntry {
            name,
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
