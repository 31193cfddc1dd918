//! Filetype maps for dynamic software-archive entries.
//!
//! A filetype entry binds one virtual folder name to a list of extension
//! specs. Each spec is either a bare extension (`UEF`) or an aliased pair
//! (`BIN:ROM`), meaning `.BIN` files on the source side are presented with a
//! `.ROM` extension. Extensions compare case-insensitively; aliases are
//! single-level.

use std::collections::{BTreeMap, HashSet};

use crate::error::ConfigError;

/// One extension spec from a filetype map.
///
/// `source` is stored upper-cased (it doubles as the name of the physical
/// extension folder); `virt` keeps the spelling from the configuration so
/// displayed names match what the operator wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSpec {
    source: String,
    virt: Option<String>,
}

impl ExtensionSpec {
    /// Parse a single spec item, `EXT` or `SRC:VIRT`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::BadExtensionSpec(raw.to_string()));
        }
        match raw.split_once(':') {
            Some((src, virt)) => {
                let src = src.trim();
                let virt = virt.trim();
                if src.is_empty() || virt.is_empty() || virt.contains(':') {
                    return Err(ConfigError::BadExtensionSpec(raw.to_string()));
                }
                Ok(Self {
                    source: src.to_uppercase(),
                    virt: Some(virt.to_string()),
                })
            }
            None => Ok(Self {
                source: raw.to_uppercase(),
                virt: None,
            }),
        }
    }

    /// The source-side extension, upper-cased. Also the name of the
    /// physical extension folder under the entry's `source_dir`.
    pub fn source_ext(&self) -> &str {
        &self.source
    }

    /// The extension this spec presents on the virtual side, in the
    /// spelling from the configuration.
    pub fn virtual_ext(&self) -> &str {
        self.virt.as_deref().unwrap_or(&self.source)
    }

    /// Whether this spec renames the extension.
    pub fn is_alias(&self) -> bool {
        self.virt.is_some()
    }

    /// Case-insensitive match against a physical file's extension.
    pub fn matches_source(&self, ext: &str) -> bool {
        ext.eq_ignore_ascii_case(&self.source)
    }

    /// Case-insensitive match against a requested virtual extension.
    pub fn matches_virtual(&self, ext: &str) -> bool {
        ext.eq_ignore_ascii_case(self.virtual_ext())
    }

    /// The name a physical file is displayed under.
    ///
    /// Without an alias the physical name is kept verbatim; with an alias
    /// the stem keeps its spelling and the extension is replaced by the
    /// virtual one.
    pub fn display_name(&self, physical_name: &str) -> String {
        match &self.virt {
            None => physical_name.to_string(),
            Some(virt) => format!("{}.{}", stem_of(physical_name), virt),
        }
    }
}

/// One virtual folder produced by a dynamic map, with its extension specs
/// in configuration order.
#[derive(Debug, Clone)]
pub struct FileTypeEntry {
    pub folder: String,
    pub specs: Vec<ExtensionSpec>,
}

impl FileTypeEntry {
    /// The first spec matching a physical extension, honouring config order.
    pub fn spec_for_source(&self, ext: &str) -> Option<&ExtensionSpec> {
        self.specs.iter().find(|s| s.matches_source(ext))
    }

    /// All specs presenting the given virtual extension, in config order.
    pub fn specs_for_virtual<'a>(
        &'a self,
        ext: &'a str,
    ) -> impl Iterator<Item = &'a ExtensionSpec> + 'a {
        self.specs.iter().filter(move |s| s.matches_virtual(ext))
    }

    /// Whether a physical file name (by extension) belongs to this entry.
    pub fn matches_file(&self, physical_name: &str) -> bool {
        extension_of(physical_name)
            .map(|ext| self.spec_for_source(ext).is_some())
            .unwrap_or(false)
    }
}

/// Parse the `filetypes:` list of a dynamic map entry.
///
/// Each list item is a single-key map from virtual folder name to a
/// comma-separated spec string, e.g. `- ROMs: "ROM, BIN:ROM, HEX:ROM"`.
pub fn parse_filetypes(
    raw: &[BTreeMap<String, String>],
) -> Result<Vec<FileTypeEntry>, ConfigError> {
    let mut entries = Vec::new();
    for item in raw {
        for (folder, spec_list) in item {
            let mut specs = Vec::new();
            for part in spec_list.split(',') {
                specs.push(ExtensionSpec::parse(part)?);
            }
            if specs.is_empty() {
                return Err(ConfigError::BadExtensionSpec(spec_list.clone()));
            }
            check_alias_chains(folder, &specs)?;
            entries.push(FileTypeEntry {
                folder: folder.clone(),
                specs,
            });
        }
    }
    Ok(entries)
}

/// Reject alias chains within one entry: a virtual extension must not be
/// the source side of another alias (`A:B` together with `B:C`).
fn check_alias_chains(folder: &str, specs: &[ExtensionSpec]) -> Result<(), ConfigError> {
    let aliased_sources: HashSet<String> = specs
        .iter()
        .filter(|s| s.is_alias())
        .map(|s| s.source.clone())
        .collect();
    for spec in specs.iter().filter(|s| s.is_alias()) {
        let virt_upper = spec.virtual_ext().to_uppercase();
        if aliased_sources.contains(&virt_upper) {
            return Err(ConfigError::AliasChain {
                folder: folder.to_string(),
                ext: spec.virtual_ext().to_string(),
            });
        }
    }
    Ok(())
}

/// The file name up to (not including) the last dot.
pub fn stem_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// The extension after the last dot, or None for dotless names.
pub fn extension_of(name: &str) -> Option<&str> {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => Some(&name[idx + 1..]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(folder: &str, specs: &str) -> FileTypeEntry {
        let raw = vec![BTreeMap::from([(folder.to_string(), specs.to_string())])];
        parse_filetypes(&raw).unwrap().remove(0)
    }

    #[test]
    fn parses_bare_extension() {
        let e = entry("Tapes", "UEF");
        assert_eq!(e.folder, "Tapes");
        assert_eq!(e.specs.len(), 1);
        assert_eq!(e.specs[0].source_ext(), "UEF");
        assert!(!e.specs[0].is_alias());
    }

    #[test]
    fn parses_alias_list() {
        let e = entry("ROMs", "BIN:ROM, HEX:ROM");
        assert_eq!(e.specs.len(), 2);
        assert_eq!(e.specs[0].source_ext(), "BIN");
        assert_eq!(e.specs[0].virtual_ext(), "ROM");
        assert_eq!(e.specs[1].source_ext(), "HEX");
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let e = entry("FDs", "SSD");
        assert!(e.specs[0].matches_source("ssd"));
        assert!(e.specs[0].matches_source("SSD"));
        assert!(e.specs[0].matches_source("Ssd"));
        assert!(!e.specs[0].matches_source("dsd"));
    }

    #[test]
    fn display_name_keeps_physical_name_without_alias() {
        let e = entry("Tapes", "UEF");
        assert_eq!(e.specs[0].display_name("Game.UEF"), "Game.UEF");
    }

    #[test]
    fn display_name_substitutes_virtual_extension() {
        let e = entry("ROMs", "BIN:ROM");
        assert_eq!(e.specs[0].display_name("TEST.BIN"), "TEST.ROM");
        assert_eq!(e.specs[0].display_name("test.bin"), "test.ROM");
    }

    #[test]
    fn first_listed_extension_wins() {
        let e = entry("HDs", "MMB, VHD");
        assert_eq!(e.spec_for_source("vhd").unwrap().source_ext(), "VHD");
        assert_eq!(e.spec_for_source("MMB").unwrap().source_ext(), "MMB");
    }

    #[test]
    fn alias_chain_is_rejected() {
        let raw = vec![BTreeMap::from([(
            "ROMs".to_string(),
            "A:B, B:C".to_string(),
        )])];
        assert!(matches!(
            parse_filetypes(&raw),
            Err(ConfigError::AliasChain { .. })
        ));
    }

    #[test]
    fn empty_spec_is_rejected() {
        let raw = vec![BTreeMap::from([("ROMs".to_string(), " , ".to_string())])];
        assert!(parse_filetypes(&raw).is_err());
    }

    #[test]
    fn stem_and_extension_helpers() {
        assert_eq!(stem_of("Elite.ssd"), "Elite");
        assert_eq!(extension_of("Elite.ssd"), Some("ssd"));
        assert_eq!(stem_of("noext"), "noext");
        assert_eq!(extension_of("noext"), None);
        // A leading dot is part of the name, not an extension marker.
        assert_eq!(stem_of(".hidden"), ".hidden");
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("a.tar.gz"), Some("gz"));
    }

    #[test]
    fn matches_file_by_extension() {
        let e = entry("FDs", "SSD, DSD");
        assert!(e.matches_file("Elite.SSD"));
        assert!(e.matches_file("Elite.dsd"));
        assert!(!e.matches_file("Elite.zip"));
        assert!(!e.matches_file("Elite"));
    }
}
