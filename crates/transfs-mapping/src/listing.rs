//! Directory listing engine.
//!
//! Materialises the full entry set of one virtual directory, independent
//! of kernel pagination: config-defined levels, merged dynamic folders,
//! archive levels. Output order is stable: folders first, then
//! case-insensitive lexicographic.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};
use transfs_archive::ArchiveError;
use transfs_core::config::{DynamicMap, MapEntry, System, ZipMode};
use transfs_core::filetypes::FileTypeEntry;
use transfs_core::paths::{self, MapTarget, Parsed};

use crate::resolver::{basename_of, matching_members, MemberFilter};
use crate::scan::has_zip_suffix;
use crate::{Engine, LocatedKind, ResolveError};

/// One entry of a materialised virtual directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryOut {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Accumulates entries with first-wins collision handling.
#[derive(Default)]
struct ListingBuilder {
    entries: BTreeMap<String, DirEntryOut>,
}

impl ListingBuilder {
    fn add(&mut self, name: String, is_dir: bool, size: u64) {
        self.entries
            .entry(name.clone())
            .or_insert(DirEntryOut { name, is_dir, size });
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Folders before files, then case-insensitive lexicographic.
    fn finish(self) -> Vec<DirEntryOut> {
        let mut entries: Vec<DirEntryOut> = self.entries.into_values().collect();
        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });
        entries
    }
}

impl Engine {
    /// Materialise the listing of one virtual directory.
    ///
    /// `Ok(None)` means the path does not resolve to a directory.
    pub fn list(&self, vpath: &str) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let config = self.config();
        match paths::parse(config, vpath) {
            Parsed::Root => {
                let mut builder = ListingBuilder::default();
                for client in &config.clients {
                    builder.add(client.name.clone(), true, 0);
                }
                if config.native_root().is_dir() {
                    builder.add(transfs_core::config::NATIVE_DIR.to_string(), true, 0);
                }
                Ok(Some(builder.finish()))
            }
            Parsed::Native { subpath } => {
                let Some(full) =
                    crate::resolver::join_confined(&config.native_root(), &subpath)
                else {
                    return Ok(None);
                };
                self.list_real_dir(&full)
            }
            Parsed::ClientOnly { client } => {
                let mut builder = ListingBuilder::default();
                for system in &client.systems {
                    builder.add(system.name.clone(), true, 0);
                }
                Ok(Some(builder.finish()))
            }
            Parsed::SystemOnly { client, system } => self.list_system(client.name.as_str(), system),
            Parsed::InSystem {
                system,
                entry_name,
                target,
                subpath,
                ..
            } => self.list_in_system(system, &entry_name, target, &subpath),
            Parsed::NotFound => Ok(None),
        }
    }

    fn list_real_dir(&self, path: &Path) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let Some(scan) = self.scan_dir(path)? else {
            return Ok(None);
        };
        let mut builder = ListingBuilder::default();
        for entry in scan.iter() {
            builder.add(entry.name.clone(), entry.is_dir, entry.size);
        }
        Ok(Some(builder.finish()))
    }

    /// A system directory: resolvable map entries and dynamic folders,
    /// plus unmapped real content sitting under the system base.
    fn list_system(
        &self,
        client_name: &str,
        system: &System,
    ) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let mut builder = ListingBuilder::default();

        for name in system.top_level_names() {
            let vpath = format!("/{}/{}/{}", client_name, system.name, name);
            match self.resolve(&vpath) {
                Ok(Some(located)) => builder.add(
                    name.to_string(),
                    located.kind == LocatedKind::Dir,
                    located.size,
                ),
                Ok(None) => {}
                Err(e) => {
                    // One broken entry never hides the whole directory.
                    warn!(path = %vpath, error = %e, "skipping unresolvable map entry");
                }
            }
        }

        if let Some(scan) = self.scan_dir(&system.base_path(self.config()))? {
            for entry in scan.iter() {
                if !builder.contains(&entry.name) {
                    builder.add(entry.name.clone(), entry.is_dir, entry.size);
                }
            }
        }

        Ok(Some(builder.finish()))
    }

    fn list_in_system(
        &self,
        system: &System,
        entry_name: &str,
        target: MapTarget<'_>,
        subpath: &[String],
    ) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let base = system.base_path(self.config());
        match target {
            MapTarget::Entry(MapEntry::Static { source_dir, .. }) => {
                let Some(full) = crate::resolver::join_confined(&base.join(source_dir), subpath)
                else {
                    return Ok(None);
                };
                self.list_real_dir(&full)
            }
            // A default-source name is a file; it has no listing.
            MapTarget::Entry(MapEntry::DefaultSource { .. }) => Ok(None),
            MapTarget::Entry(MapEntry::DirectMount {
                mount,
                supports_zip,
                zip_mode,
                ..
            }) => {
                let dir = base.join(mount);
                if *supports_zip {
                    self.list_with_archives(&dir, subpath, *zip_mode, MemberFilter::Any)
                } else {
                    let Some(full) = crate::resolver::join_confined(&dir, subpath) else {
                        return Ok(None);
                    };
                    self.list_real_dir(&full)
                }
            }
            MapTarget::Entry(MapEntry::Dynamic(_)) => Ok(None),
            MapTarget::DynamicFolder { map, entry } => {
                self.list_dynamic(&base, map, entry, subpath)
            }
            MapTarget::Passthrough => {
                let mut components = vec![entry_name.to_string()];
                components.extend_from_slice(subpath);
                let Some(full) = crate::resolver::join_confined(&base, &components) else {
                    return Ok(None);
                };
                self.list_real_dir(&full)
            }
        }
    }

    // -----------------------------------------------------------------
    // Dynamic folders
    // -----------------------------------------------------------------

    /// Merge the contents of every candidate root at `subpath`, applying
    /// extension filtering, alias display, and archive policy.
    fn list_dynamic(
        &self,
        base: &Path,
        map: &DynamicMap,
        entry: &FileTypeEntry,
        subpath: &[String],
    ) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let source_root = base.join(&map.source_dir);
        let roots = self.candidate_roots(&source_root, entry);
        if roots.is_empty() {
            return Ok(None);
        }

        let mut builder = ListingBuilder::default();
        let mut listed_any = false;

        for root in &roots {
            let specs = root.specs(entry);
            let filter = MemberFilter::Specs(&specs);

            // Walk the subpath below this root; it may cross into an
            // archive displayed as a directory.
            match self.descend(&root.dir, subpath, map.supports_zip)? {
                Descent::Dir(dir) => {
                    listed_any = true;
                    self.list_dynamic_level(&dir, map, filter, &mut builder)?;
                }
                Descent::Archive { archive, rest } => {
                    if self.list_archive_level(&archive, &rest, map.zip_mode, filter, &mut builder)?
                    {
                        listed_any = true;
                    }
                }
                Descent::Missing => {}
            }
        }

        Ok(if listed_any {
            Some(builder.finish())
        } else {
            None
        })
    }

    /// One physical directory level of a dynamic folder.
    fn list_dynamic_level(
        &self,
        dir: &Path,
        map: &DynamicMap,
        filter: MemberFilter<'_>,
        builder: &mut ListingBuilder,
    ) -> Result<(), ResolveError> {
        let Some(scan) = self.scan_dir(dir)? else {
            return Ok(());
        };

        // Real files and subdirectories first: real names shadow anything
        // an archive would contribute.
        for phys in scan.iter() {
            if phys.is_dir {
                builder.add(phys.name.clone(), true, 0);
            } else if map.supports_zip && phys.is_zip() {
                continue;
            } else if let Some(display) = filter.display(&phys.name) {
                builder.add(display, false, phys.size);
            }
        }

        if !map.supports_zip {
            return Ok(());
        }

        for phys in scan.iter().filter(|e| e.is_zip()) {
            let archive = dir.join(&phys.name);
            let snapshot = match self.archives().snapshot(&archive) {
                Ok(snap) => snap,
                Err(e @ ArchiveError::Malformed { .. }) => {
                    // An unreadable archive stays listed as a plain file.
                    warn!(archive = %archive.display(), error = %e, "listing unreadable archive as a file");
                    builder.add(phys.name.clone(), false, phys.size);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match map.zip_mode {
                ZipMode::Hierarchical => {
                    builder.add(phys.name.clone(), true, 0);
                }
                ZipMode::Flatten => {
                    let matching = matching_members(&snapshot, filter);
                    match matching.as_slice() {
                        [] => {
                            debug!(archive = %archive.display(), "flatten archive has no matching members, hiding");
                        }
                        [(member, size)] => {
                            if let Some(display) = filter.display(basename_of(member)) {
                                // A real file of the same name wins.
                                if !builder.contains(&display) {
                                    builder.add(display, false, *size);
                                }
                            }
                        }
                        _ => {
                            builder.add(phys.name.clone(), true, 0);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// One level inside an archive displayed as a directory. Returns
    /// whether the level exists.
    fn list_archive_level(
        &self,
        archive: &Path,
        subpath: &str,
        zip_mode: ZipMode,
        filter: MemberFilter<'_>,
        builder: &mut ListingBuilder,
    ) -> Result<bool, ResolveError> {
        // In flatten mode an archive only browses with multiple matches.
        if zip_mode == ZipMode::Flatten {
            let snapshot = match self.archives().snapshot(archive) {
                Ok(snap) => snap,
                Err(ArchiveError::Malformed { .. }) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if matching_members(&snapshot, filter).len() < 2 {
                return Ok(false);
            }
        }

        let Some(scan) = self.scan_archive(archive, subpath)? else {
            return Ok(false);
        };
        for entry in scan.iter() {
            if entry.is_dir {
                builder.add(entry.name.clone(), true, 0);
            } else {
                match zip_mode {
                    ZipMode::Hierarchical => {
                        builder.add(entry.name.clone(), false, entry.size);
                    }
                    ZipMode::Flatten => {
                        if let Some(display) = filter.display(&entry.name) {
                            builder.add(display, false, entry.size);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    /// A direct-mount level: passthrough plus archive display policy,
    /// with no extension filtering.
    fn list_with_archives(
        &self,
        dir: &Path,
        subpath: &[String],
        zip_mode: ZipMode,
        filter: MemberFilter<'_>,
    ) -> Result<Option<Vec<DirEntryOut>>, ResolveError> {
        let mut builder = ListingBuilder::default();
        match self.descend(dir, subpath, true)? {
            Descent::Dir(current) => {
                let Some(scan) = self.scan_dir(&current)? else {
                    return Ok(None);
                };
                for phys in scan.iter() {
                    if phys.is_dir {
                        builder.add(phys.name.clone(), true, 0);
                    } else if phys.is_zip() {
                        match zip_mode {
                            ZipMode::Hierarchical => builder.add(phys.name.clone(), true, 0),
                            ZipMode::Flatten => {
                                let archive = current.join(&phys.name);
                                match self.archives().snapshot(&archive) {
                                    Ok(snapshot) => {
                                        let matching = matching_members(&snapshot, filter);
                                        match matching.as_slice() {
                                            [] => {}
                                            [(member, size)] => builder.add(
                                                basename_of(member).to_string(),
                                                false,
                                                *size,
                                            ),
                                            _ => builder.add(phys.name.clone(), true, 0),
                                        }
                                    }
                                    Err(_) => builder.add(phys.name.clone(), false, phys.size),
                                }
                            }
                        }
                    } else {
                        builder.add(phys.name.clone(), false, phys.size);
                    }
                }
                Ok(Some(builder.finish()))
            }
            Descent::Archive { archive, rest } => {
                if self.list_archive_level(&archive, &rest, zip_mode, filter, &mut builder)? {
                    Ok(Some(builder.finish()))
                } else {
                    Ok(None)
                }
            }
            Descent::Missing => Ok(None),
        }
    }

    /// Walk `subpath` below `dir`, stopping at the first archive boundary.
    fn descend(
        &self,
        dir: &Path,
        subpath: &[String],
        cross_archives: bool,
    ) -> Result<Descent, ResolveError> {
        let mut current = dir.to_path_buf();
        for (i, component) in subpath.iter().enumerate() {
            let candidate = current.join(component);
            if candidate.is_dir() {
                current = candidate;
                continue;
            }
            if cross_archives && has_zip_suffix(component) && candidate.is_file() {
                return Ok(Descent::Archive {
                    archive: candidate,
                    rest: subpath[i + 1..].join("/"),
                });
            }
            return Ok(Descent::Missing);
        }
        Ok(Descent::Dir(current))
    }
}

enum Descent {
    Dir(std::path::PathBuf),
    Archive {
        archive: std::path::PathBuf,
        rest: String,
    },
    Missing,
}
