//! Typed configuration for TransFS.
//!
//! The on-disk format is YAML in up to two documents: the app document
//! (mountpoint, filestore, cache directory) and the clients document, either
//! inline under `clients:` or in a separate file referenced by
//! `clients_file:`. A `sources:` document may sit alongside these; it is
//! consumed by the acquisition subsystem and ignored here, as are all other
//! unknown fields.
//!
//! Map entries arrive as heterogeneous single-key YAML maps. They are parsed
//! once at load into the tagged [`MapEntry`] enum; downstream code pattern
//! matches on the variant and never sees the raw shape.

use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::filetypes::{parse_filetypes, FileTypeEntry};

/// The map key that selects the dynamic software-archives variant.
pub const DYNAMIC_KEY: &str = "...SoftwareArchives...";

/// Directory under the filestore that roots all physical content.
pub const NATIVE_DIR: &str = "Native";

/// Top-level configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the virtual tree is mounted.
    pub mountpoint: PathBuf,
    /// Root of the physical store; content lives under `<filestore>/Native/`.
    pub filestore: PathBuf,
    /// Directory for the serialised listing cache. None disables spill.
    pub cache_dir: Option<PathBuf>,
    pub clients: Vec<Client>,
}

/// A named downstream consumer of the virtual tree.
#[derive(Debug, Clone)]
pub struct Client {
    pub name: String,
    /// Optional target-path template, e.g. `/{client_name}/{system_name}`.
    pub default_target_path: Option<String>,
    pub systems: Vec<System>,
}

/// One emulated platform under a client.
#[derive(Debug, Clone)]
pub struct System {
    pub name: String,
    pub manufacturer: Option<String>,
    pub canonical_system_name: Option<String>,
    /// Relative to `<filestore>/Native/`.
    pub local_base_path: PathBuf,
    pub maps: Vec<MapEntry>,
}

/// How archives are presented inside a map that supports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZipMode {
    /// Single-match archives collapse to their member; others browse.
    Flatten,
    /// Archives are always browsable directories.
    #[default]
    Hierarchical,
}

/// One rule producing a virtual child of a system.
#[derive(Debug, Clone)]
pub enum MapEntry {
    /// Virtual directory bound to a relative source directory; passthrough.
    Static { name: String, source_dir: PathBuf },
    /// Virtual filename bound to one physical file, optionally a member of
    /// an archive (`unzip: true`).
    DefaultSource {
        name: String,
        source_filename: PathBuf,
        unzip: bool,
        /// Explicit member path; otherwise the member whose basename equals
        /// the virtual name is used.
        zip_internal_file: Option<String>,
    },
    /// Macro entry expanding to one virtual folder per filetype entry.
    Dynamic(DynamicMap),
    /// Virtual directory bound to one physical directory, with optional
    /// archive settings.
    DirectMount {
        name: String,
        mount: PathBuf,
        supports_zip: bool,
        zip_mode: ZipMode,
    },
}

impl MapEntry {
    /// The virtual name this entry binds, for non-dynamic variants.
    pub fn virtual_name(&self) -> Option<&str> {
        match self {
            MapEntry::Static { name, .. }
            | MapEntry::DefaultSource { name, .. }
            | MapEntry::DirectMount { name, .. } => Some(name),
            MapEntry::Dynamic(_) => None,
        }
    }
}

/// The dynamic software-archives map.
#[derive(Debug, Clone)]
pub struct DynamicMap {
    pub source_dir: PathBuf,
    pub supports_zip: bool,
    pub zip_mode: ZipMode,
    pub filetypes: Vec<FileTypeEntry>,
}

impl DynamicMap {
    pub fn entry(&self, folder: &str) -> Option<&FileTypeEntry> {
        self.filetypes.iter().find(|e| e.folder == folder)
    }
}

// ---------------------------------------------------------------------------
// Raw (on-disk) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    mountpoint: PathBuf,
    filestore: PathBuf,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    clients_file: Option<PathBuf>,
    #[serde(default)]
    clients: Vec<RawClient>,
}

#[derive(Debug, Deserialize)]
struct RawClientsDoc {
    #[serde(default)]
    clients: Vec<RawClient>,
}

#[derive(Debug, Deserialize)]
struct RawClient {
    name: String,
    #[serde(default)]
    default_target_path: Option<String>,
    #[serde(default)]
    systems: Vec<RawSystem>,
}

#[derive(Debug, Deserialize)]
struct RawSystem {
    name: String,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    canonical_system_name: Option<String>,
    local_base_path: PathBuf,
    #[serde(default)]
    maps: Vec<BTreeMap<String, RawMapValue>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMapValue {
    #[serde(default)]
    source_dir: Option<PathBuf>,
    #[serde(default)]
    source_filename: Option<PathBuf>,
    #[serde(default)]
    unzip: bool,
    #[serde(default)]
    zip_internal_file: Option<String>,
    #[serde(default)]
    default_source: Option<Box<RawMapValue>>,
    #[serde(default)]
    mount: Option<PathBuf>,
    #[serde(default)]
    supports_zip: Option<bool>,
    #[serde(default)]
    zip_mode: Option<ZipMode>,
    #[serde(default)]
    filetypes: Vec<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load the app document from `path`, pulling clients from
    /// `clients_file` (resolved relative to `path`) when configured.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut raw: RawConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        if let Some(clients_file) = raw.clients_file.take() {
            let clients_path = match path.parent() {
                Some(parent) if clients_file.is_relative() => parent.join(&clients_file),
                _ => clients_file.clone(),
            };
            let text =
                std::fs::read_to_string(&clients_path).map_err(|source| ConfigError::Read {
                    path: clients_path.display().to_string(),
                    source,
                })?;
            let doc: RawClientsDoc =
                serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: clients_path.display().to_string(),
                    source,
                })?;
            raw.clients.extend(doc.clients);
        }

        Self::from_raw(raw)
    }

    /// Parse a single inline YAML document. Used by tests and `check`.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Platform default location of the app document.
    pub fn default_path() -> PathBuf {
        PathBuf::from("transfs.yaml")
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut clients = Vec::with_capacity(raw.clients.len());
        let mut client_names = HashSet::new();
        for raw_client in raw.clients {
            if !client_names.insert(raw_client.name.clone()) {
                return Err(ConfigError::DuplicateClient(raw_client.name));
            }
            clients.push(Client::from_raw(raw_client)?);
        }
        Ok(Self {
            mountpoint: raw.mountpoint,
            filestore: raw.filestore,
            cache_dir: raw.cache_dir,
            clients,
        })
    }

    pub fn client(&self, name: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.name == name)
    }

    /// Root of the physical content tree, `<filestore>/Native/`.
    pub fn native_root(&self) -> PathBuf {
        self.filestore.join(NATIVE_DIR)
    }
}

impl Client {
    fn from_raw(raw: RawClient) -> Result<Self, ConfigError> {
        let mut systems = Vec::with_capacity(raw.systems.len());
        let mut system_names = HashSet::new();
        for raw_system in raw.systems {
            if !system_names.insert(raw_system.name.clone()) {
                return Err(ConfigError::DuplicateSystem {
                    client: raw.name,
                    system: raw_system.name,
                });
            }
            systems.push(System::from_raw(raw_system)?);
        }
        Ok(Self {
            name: raw.name,
            default_target_path: raw.default_target_path,
            systems,
        })
    }

    pub fn system(&self, name: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.name == name)
    }
}

impl System {
    fn from_raw(raw: RawSystem) -> Result<Self, ConfigError> {
        ensure_relative(&raw.local_base_path)?;

        let mut maps = Vec::with_capacity(raw.maps.len());
        for item in raw.maps {
            for (key, value) in item {
                maps.push(map_entry_from_raw(&raw.name, key, value)?);
            }
        }

        let system = Self {
            name: raw.name,
            manufacturer: raw.manufacturer,
            canonical_system_name: raw.canonical_system_name,
            local_base_path: raw.local_base_path,
            maps,
        };
        system.check_unique_virtual_names()?;
        Ok(system)
    }

    fn check_unique_virtual_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in self.top_level_names() {
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateVirtualName {
                    system: self.name.clone(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// All top-level virtual names this system exposes, in map order with
    /// dynamic folders expanded in place.
    pub fn top_level_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for entry in &self.maps {
            match entry {
                MapEntry::Dynamic(dynamic) => {
                    names.extend(dynamic.filetypes.iter().map(|e| e.folder.as_str()));
                }
                other => {
                    if let Some(name) = other.virtual_name() {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    /// The dynamic map of this system, if any.
    pub fn dynamic(&self) -> Option<&DynamicMap> {
        self.maps.iter().find_map(|m| match m {
            MapEntry::Dynamic(d) => Some(d),
            _ => None,
        })
    }

    /// Non-dynamic map entry bound to the given virtual name.
    pub fn map_entry(&self, name: &str) -> Option<&MapEntry> {
        self.maps.iter().find(|m| m.virtual_name() == Some(name))
    }

    /// Physical base of this system: `<filestore>/Native/<local_base_path>/`.
    pub fn base_path(&self, config: &Config) -> PathBuf {
        config.native_root().join(&self.local_base_path)
    }
}

fn map_entry_from_raw(
    system: &str,
    name: String,
    mut value: RawMapValue,
) -> Result<MapEntry, ConfigError> {
    if name == DYNAMIC_KEY {
        let source_dir = value.source_dir.take().ok_or_else(|| {
            ConfigError::UnknownMapShape {
                system: system.to_string(),
                name: name.clone(),
            }
        })?;
        ensure_relative(&source_dir)?;
        return Ok(MapEntry::Dynamic(DynamicMap {
            source_dir,
            supports_zip: value.supports_zip.unwrap_or(true),
            zip_mode: value.zip_mode.unwrap_or_default(),
            filetypes: parse_filetypes(&value.filetypes)?,
        }));
    }

    if let Some(mount) = value.mount.take() {
        ensure_relative(&mount)?;
        return Ok(MapEntry::DirectMount {
            name,
            mount,
            supports_zip: value.supports_zip.unwrap_or(false),
            zip_mode: value.zip_mode.unwrap_or_default(),
        });
    }

    // `default_source:` nests the same shape one level down.
    let effective = match value.default_source.take() {
        Some(nested) => *nested,
        None => value,
    };

    if let Some(source_dir) = effective.source_dir {
        ensure_relative(&source_dir)?;
        return Ok(MapEntry::Static { name, source_dir });
    }
    if let Some(source_filename) = effective.source_filename {
        ensure_relative(&source_filename)?;
        return Ok(MapEntry::DefaultSource {
            name,
            source_filename,
            unzip: effective.unzip,
            zip_internal_file: effective.zip_internal_file,
        });
    }

    Err(ConfigError::UnknownMapShape {
        system: system.to_string(),
        name,
    })
}

/// Configured paths must stay below the filestore: relative, no `..`.
fn ensure_relative(path: &Path) -> Result<(), ConfigError> {
    let ok = path.is_relative()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::UnsafePath(path.display().to_string()))
    }
}
