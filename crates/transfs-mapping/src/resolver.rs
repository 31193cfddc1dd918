//! Virtual path resolution.
//!
//! Applies the map rules in order (default-source, static, dynamic,
//! direct-mount, passthrough) and answers with the single authoritative
//! physical location. All computed paths are confined below the owning
//! system's base directory; anything that would escape resolves to a
//! negative.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use transfs_archive::{ArchiveError, ArchiveSnapshot};
use transfs_core::config::{DynamicMap, MapEntry, System, ZipMode};
use transfs_core::filetypes::{extension_of, stem_of, ExtensionSpec, FileTypeEntry};
use transfs_core::paths::{self, MapTarget, Parsed};

use crate::scan::has_zip_suffix;
use crate::{Engine, Located, ResolveError};

/// Where a virtual path lands physically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    RealFile(PathBuf),
    RealDir(PathBuf),
    /// A member file inside an archive.
    ArchiveMember { archive: PathBuf, member: String },
    /// A directory level inside an archive; empty subpath is the root.
    ArchiveDir { archive: PathBuf, subpath: String },
    /// A directory that exists only in the virtual tree.
    SynthDir,
}

/// One physical directory feeding a dynamic virtual folder.
#[derive(Debug)]
pub(crate) struct CandidateRoot {
    pub dir: PathBuf,
    /// Index into the entry's specs for an extension root; None for the
    /// semantic-folder fallback, which carries every spec.
    pub spec_idx: Option<usize>,
}

impl CandidateRoot {
    pub fn specs<'e>(&self, entry: &'e FileTypeEntry) -> Vec<&'e ExtensionSpec> {
        match self.spec_idx {
            Some(idx) => vec![&entry.specs[idx]],
            None => entry.specs.iter().collect(),
        }
    }
}

/// Extension filter applied to archive members.
///
/// Dynamic folders filter by their specs; direct mounts accept any member.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MemberFilter<'a> {
    Any,
    Specs(&'a [&'a ExtensionSpec]),
}

impl<'a> MemberFilter<'a> {
    /// The display name of a member basename passing the filter.
    pub fn display(&self, basename: &str) -> Option<String> {
        match self {
            MemberFilter::Any => Some(basename.to_string()),
            MemberFilter::Specs(specs) => {
                let ext = extension_of(basename)?;
                specs
                    .iter()
                    .find(|s| s.matches_source(ext))
                    .map(|s| s.display_name(basename))
            }
        }
    }

    /// Whether a member basename, after display mapping, satisfies the
    /// requested virtual name. Stems compare exactly; extensions compare
    /// case-insensitively.
    pub fn satisfies(&self, basename: &str, requested: &str) -> bool {
        match self {
            MemberFilter::Any => basename == requested,
            MemberFilter::Specs(specs) => {
                let Some(src_ext) = extension_of(basename) else {
                    return basename == requested;
                };
                let Some(req_ext) = extension_of(requested) else {
                    return false;
                };
                stem_of(basename) == stem_of(requested)
                    && specs
                        .iter()
                        .any(|s| s.matches_source(src_ext) && s.matches_virtual(req_ext))
            }
        }
    }
}

impl Engine {
    /// Resolve a virtual path to its authoritative physical location.
    ///
    /// `Ok(None)` is the clean negative: nothing at this path.
    pub fn resolve(&self, vpath: &str) -> Result<Option<Located>, ResolveError> {
        let config = self.config();
        match paths::parse(config, vpath) {
            Parsed::Root | Parsed::ClientOnly { .. } | Parsed::SystemOnly { .. } => {
                Ok(Some(Located::synth_dir()))
            }
            Parsed::Native { subpath } => {
                let Some(full) = join_confined(&config.native_root(), &subpath) else {
                    return Ok(None);
                };
                self.locate_real(&full)
            }
            Parsed::InSystem {
                system,
                entry_name,
                target,
                subpath,
                ..
            } => self.resolve_in_system(system, &entry_name, target, &subpath),
            Parsed::NotFound => Ok(None),
        }
    }

    fn resolve_in_system(
        &self,
        system: &System,
        entry_name: &str,
        target: MapTarget<'_>,
        subpath: &[String],
    ) -> Result<Option<Located>, ResolveError> {
        let base = system.base_path(self.config());
        match target {
            MapTarget::Entry(MapEntry::Static { source_dir, .. }) => {
                let Some(full) = join_confined(&base.join(source_dir), subpath) else {
                    return Ok(None);
                };
                self.locate_real(&full)
            }
            MapTarget::Entry(MapEntry::DefaultSource {
                name,
                source_filename,
                unzip,
                zip_internal_file,
            }) => {
                if !subpath.is_empty() {
                    return Ok(None);
                }
                self.resolve_default_source(
                    &base.join(source_filename),
                    name,
                    *unzip,
                    zip_internal_file.as_deref(),
                )
            }
            MapTarget::Entry(MapEntry::DirectMount {
                mount,
                supports_zip,
                zip_mode,
                ..
            }) => {
                let dir = base.join(mount);
                if *supports_zip {
                    self.walk_with_archives(&dir, subpath, *zip_mode, MemberFilter::Any)
                } else {
                    let Some(full) = join_confined(&dir, subpath) else {
                        return Ok(None);
                    };
                    self.locate_real(&full)
                }
            }
            // The dynamic map itself has no virtual name; only its expanded
            // folders are addressable.
            MapTarget::Entry(MapEntry::Dynamic(_)) => Ok(None),
            MapTarget::DynamicFolder { map, entry } => {
                self.resolve_dynamic(&base, map, entry, subpath)
            }
            MapTarget::Passthrough => {
                let mut components = vec![entry_name.to_string()];
                components.extend_from_slice(subpath);
                let Some(full) = join_confined(&base, &components) else {
                    return Ok(None);
                };
                self.locate_real(&full)
            }
        }
    }

    fn resolve_default_source(
        &self,
        source: &Path,
        virtual_name: &str,
        unzip: bool,
        zip_internal_file: Option<&str>,
    ) -> Result<Option<Located>, ResolveError> {
        let is_archive = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(has_zip_suffix)
            .unwrap_or(false);

        if !(unzip && is_archive) {
            return self.locate_real_file(source);
        }

        if !source.is_file() {
            return Ok(None);
        }
        let snapshot = match self.archives().snapshot(source) {
            Ok(snap) => snap,
            Err(e @ ArchiveError::Malformed { .. }) => {
                warn!(archive = %source.display(), error = %e, "cannot index default-source archive");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let member = match zip_internal_file {
            Some(member) => snapshot.member_size(member).map(|_| member.to_string()),
            None => snapshot.find_member(virtual_name).map(str::to_string),
        };
        Ok(member.map(|member| {
            let size = snapshot.member_size(&member).unwrap_or(0);
            Located::archive_member(source, member, size, snapshot.mtime())
        }))
    }

    // -----------------------------------------------------------------
    // Dynamic software-archive folders
    // -----------------------------------------------------------------

    /// The existing physical directories feeding one virtual folder, in
    /// spec order, with the semantic-folder fallback when no extension
    /// directory exists.
    pub(crate) fn candidate_roots(
        &self,
        source_root: &Path,
        entry: &FileTypeEntry,
    ) -> Vec<CandidateRoot> {
        let mut roots = Vec::new();
        for (idx, spec) in entry.specs.iter().enumerate() {
            let dir = source_root.join(spec.source_ext());
            if dir.is_dir() {
                roots.push(CandidateRoot {
                    dir,
                    spec_idx: Some(idx),
                });
            }
        }
        if roots.is_empty() {
            let fallback = source_root.join(&entry.folder);
            if fallback.is_dir() {
                roots.push(CandidateRoot {
                    dir: fallback,
                    spec_idx: None,
                });
            }
        }
        roots
    }

    fn resolve_dynamic(
        &self,
        base: &Path,
        map: &DynamicMap,
        entry: &FileTypeEntry,
        subpath: &[String],
    ) -> Result<Option<Located>, ResolveError> {
        let source_root = base.join(&map.source_dir);
        let roots = self.candidate_roots(&source_root, entry);

        if subpath.is_empty() {
            // The folder exists when anything feeds it.
            return Ok(if roots.is_empty() {
                None
            } else {
                Some(Located::synth_dir())
            });
        }

        for root in &roots {
            let specs = root.specs(entry);
            let filter = MemberFilter::Specs(&specs);
            if let Some(located) = self.walk_dynamic_root(root, &specs, map, filter, subpath)? {
                return Ok(Some(located));
            }
        }
        Ok(None)
    }

    /// Walk `subpath` below one candidate root, crossing into archives
    /// where configured.
    fn walk_dynamic_root(
        &self,
        root: &CandidateRoot,
        specs: &[&ExtensionSpec],
        map: &DynamicMap,
        filter: MemberFilter<'_>,
        subpath: &[String],
    ) -> Result<Option<Located>, ResolveError> {
        let mut current = root.dir.clone();
        for (i, component) in subpath.iter().enumerate() {
            if !is_safe_component(component) {
                return Ok(None);
            }
            let candidate = current.join(component);
            let is_last = i + 1 == subpath.len();

            if candidate.is_dir() {
                if is_last {
                    return self.locate_real(&candidate);
                }
                current = candidate;
                continue;
            }

            if map.supports_zip && has_zip_suffix(component) && candidate.is_file() {
                let rest = subpath[i + 1..].join("/");
                return self.resolve_in_archive(&candidate, &rest, map.zip_mode, filter);
            }

            if is_last {
                return self.resolve_dynamic_leaf(&current, specs, map, filter, component);
            }
            return Ok(None);
        }
        Ok(None)
    }

    /// Resolve a file name directly inside a dynamic directory level:
    /// a real source file (alias-aware) first, then a flattened
    /// single-match archive member.
    fn resolve_dynamic_leaf(
        &self,
        dir: &Path,
        specs: &[&ExtensionSpec],
        map: &DynamicMap,
        filter: MemberFilter<'_>,
        requested: &str,
    ) -> Result<Option<Located>, ResolveError> {
        let Some(entries) = self.scan_dir(dir)? else {
            return Ok(None);
        };
        let Some(req_ext) = extension_of(requested) else {
            return Ok(None);
        };

        // Real files win over archive members; the first listed extension
        // wins across specs.
        for spec in specs {
            if !spec.matches_virtual(req_ext) {
                continue;
            }
            for phys in entries.iter().filter(|e| !e.is_dir) {
                let Some(phys_ext) = extension_of(&phys.name) else {
                    continue;
                };
                if spec.matches_source(phys_ext) && stem_of(&phys.name) == stem_of(requested) {
                    return self.locate_real_file(&dir.join(&phys.name));
                }
            }
        }

        if map.supports_zip && map.zip_mode == ZipMode::Flatten {
            for phys in entries.iter().filter(|e| e.is_zip()) {
                let archive = dir.join(&phys.name);
                let snapshot = match self.archives().snapshot(&archive) {
                    Ok(snap) => snap,
                    Err(e @ ArchiveError::Malformed { .. }) => {
                        debug!(archive = %archive.display(), error = %e, "skipping unreadable archive");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let matching = matching_members(&snapshot, filter);
                if let [(member, size)] = matching.as_slice() {
                    let basename = basename_of(member);
                    if filter.satisfies(basename, requested) {
                        return Ok(Some(Located::archive_member(
                            &archive,
                            member.clone(),
                            *size,
                            snapshot.mtime(),
                        )));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Resolve `rest` inside one archive according to the zip mode.
    pub(crate) fn resolve_in_archive(
        &self,
        archive: &Path,
        rest: &str,
        zip_mode: ZipMode,
        filter: MemberFilter<'_>,
    ) -> Result<Option<Located>, ResolveError> {
        let snapshot = match self.archives().snapshot(archive) {
            Ok(snap) => snap,
            Err(e @ ArchiveError::Malformed { .. }) => {
                // An unreadable archive stays visible as a plain file.
                warn!(archive = %archive.display(), error = %e, "archive is unreadable, treating as a file");
                return if rest.is_empty() {
                    self.locate_real_file(archive)
                } else {
                    Ok(None)
                };
            }
            Err(e) => return Err(e.into()),
        };

        match zip_mode {
            ZipMode::Hierarchical => {
                if snapshot.is_dir(rest) {
                    return Ok(Some(Located::archive_dir(
                        archive,
                        rest.to_string(),
                        snapshot.mtime(),
                    )));
                }
                Ok(snapshot.member_size(rest).map(|size| {
                    Located::archive_member(archive, rest.to_string(), size, snapshot.mtime())
                }))
            }
            ZipMode::Flatten => {
                let matching = matching_members(&snapshot, filter);
                match matching.len() {
                    // Hidden entirely, or represented only by its
                    // flattened member in the parent directory.
                    0 | 1 => Ok(None),
                    _ => self.resolve_in_flatten_dir(archive, &snapshot, rest, filter),
                }
            }
        }
    }

    /// Browse a multi-match flatten archive: one level of the internal
    /// tree with files restricted to matching members.
    fn resolve_in_flatten_dir(
        &self,
        archive: &Path,
        snapshot: &ArchiveSnapshot,
        rest: &str,
        filter: MemberFilter<'_>,
    ) -> Result<Option<Located>, ResolveError> {
        if snapshot.is_dir(rest) {
            return Ok(Some(Located::archive_dir(
                archive,
                rest.to_string(),
                snapshot.mtime(),
            )));
        }

        // The last component is a display name; earlier ones must be
        // archive directories.
        let (parent, requested) = match rest.rfind('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => ("", rest),
        };
        if !snapshot.is_dir(parent) {
            return Ok(None);
        }
        let Some(listing) = snapshot.list(parent) else {
            return Ok(None);
        };
        for (name, size) in &listing.files {
            if filter.display(name).is_some() && filter.satisfies(name, requested) {
                let member = if parent.is_empty() {
                    name.clone()
                } else {
                    format!("{parent}/{name}")
                };
                return Ok(Some(Located::archive_member(
                    archive,
                    member,
                    *size,
                    snapshot.mtime(),
                )));
            }
        }
        Ok(None)
    }

    /// Walk a direct-mount subtree, crossing into archives. Archives are
    /// matched without extension filtering.
    fn walk_with_archives(
        &self,
        dir: &Path,
        subpath: &[String],
        zip_mode: ZipMode,
        filter: MemberFilter<'_>,
    ) -> Result<Option<Located>, ResolveError> {
        let mut current = dir.to_path_buf();
        for (i, component) in subpath.iter().enumerate() {
            if !is_safe_component(component) {
                return Ok(None);
            }
            let candidate = current.join(component);
            let is_last = i + 1 == subpath.len();

            if candidate.is_dir() {
                if is_last {
                    return self.locate_real(&candidate);
                }
                current = candidate;
                continue;
            }
            if has_zip_suffix(component) && candidate.is_file() {
                let rest = subpath[i + 1..].join("/");
                return self.resolve_in_archive(&candidate, &rest, zip_mode, filter);
            }
            if is_last {
                return self.locate_real_file(&candidate);
            }
            return Ok(None);
        }
        self.locate_real(&current)
    }
}

/// All member files of a snapshot passing the filter, in path order.
pub(crate) fn matching_members(
    snapshot: &ArchiveSnapshot,
    filter: MemberFilter<'_>,
) -> Vec<(String, u64)> {
    snapshot
        .members()
        .filter(|(member, _)| filter.display(basename_of(member)).is_some())
        .map(|(member, size)| (member.to_string(), size))
        .collect()
}

pub(crate) fn basename_of(member: &str) -> &str {
    member.rsplit('/').next().unwrap_or(member)
}

/// Join validated virtual components below a base; anything that could
/// escape resolves to nothing.
pub(crate) fn join_confined(base: &Path, components: &[String]) -> Option<PathBuf> {
    let mut path = base.to_path_buf();
    for component in components {
        if !is_safe_component(component) {
            return None;
        }
        path.push(component);
    }
    Some(path)
}

fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains('/')
        && !component.contains('\0')
}
