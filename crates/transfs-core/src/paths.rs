//! Virtual path parsing.
//!
//! A virtual path under the mount decomposes as
//! `/<Client>/<SystemName>/<map-entry-or-virtual-folder>/<subpath...>`, with
//! a special top-level `Native/` that passes through to the physical store.
//! Segment matching is exact (case-sensitive); components that could escape
//! the tree never parse.

use crate::config::{Client, Config, MapEntry, System, NATIVE_DIR};
use crate::filetypes::FileTypeEntry;

/// What the third path segment resolved to inside a system.
#[derive(Debug, Clone, Copy)]
pub enum MapTarget<'a> {
    /// A configured static / default-source / direct-mount entry.
    Entry(&'a MapEntry),
    /// A virtual folder expanded from the dynamic map.
    DynamicFolder {
        map: &'a crate::config::DynamicMap,
        entry: &'a FileTypeEntry,
    },
    /// No configured entry matched; the segment falls through to the
    /// system's physical base directory.
    Passthrough,
}

/// A parsed virtual path.
#[derive(Debug)]
pub enum Parsed<'a> {
    Root,
    /// The `Native/` passthrough tree; subpath is relative to
    /// `<filestore>/Native/`.
    Native { subpath: Vec<String> },
    ClientOnly {
        client: &'a Client,
    },
    SystemOnly {
        client: &'a Client,
        system: &'a System,
    },
    InSystem {
        client: &'a Client,
        system: &'a System,
        /// The matched third segment as written.
        entry_name: String,
        target: MapTarget<'a>,
        /// Remaining segments after the entry name.
        subpath: Vec<String>,
    },
    NotFound,
}

/// Split and validate a virtual path against the configuration.
pub fn parse<'a>(config: &'a Config, vpath: &str) -> Parsed<'a> {
    let segments: Vec<&str> = vpath.split('/').filter(|s| !s.is_empty()).collect();

    // Reject traversal components outright; no virtual name contains them.
    if segments.iter().any(|s| *s == "." || *s == ".." || s.contains('\0')) {
        return Parsed::NotFound;
    }

    if segments.is_empty() {
        return Parsed::Root;
    }

    if segments[0] == NATIVE_DIR {
        return Parsed::Native {
            subpath: segments[1..].iter().map(|s| s.to_string()).collect(),
        };
    }

    let Some(client) = config.client(segments[0]) else {
        return Parsed::NotFound;
    };
    if segments.len() == 1 {
        return Parsed::ClientOnly { client };
    }

    let Some(system) = client.system(segments[1]) else {
        return Parsed::NotFound;
    };
    if segments.len() == 2 {
        return Parsed::SystemOnly { client, system };
    }

    let entry_name = segments[2].to_string();
    let subpath: Vec<String> = segments[3..].iter().map(|s| s.to_string()).collect();

    if let Some(entry) = system.map_entry(&entry_name) {
        return Parsed::InSystem {
            client,
            system,
            entry_name,
            target: MapTarget::Entry(entry),
            subpath,
        };
    }

    if let Some(dynamic) = system.dynamic() {
        if let Some(entry) = dynamic.entry(&entry_name) {
            return Parsed::InSystem {
                client,
                system,
                entry_name,
                target: MapTarget::DynamicFolder {
                    map: dynamic,
                    entry,
                },
                subpath,
            };
        }
    }

    // Unmapped names fall through to the system's physical base, so real
    // content sitting next to mapped folders stays reachable.
    Parsed::InSystem {
        client,
        system,
        entry_name,
        target: MapTarget::Passthrough,
        subpath,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config::from_yaml(
            r#"
mountpoint: /mnt/transfs
filestore: /mnt/filestorefs
clients:
  - name: MiSTer
    systems:
      - name: AcornElectron
        local_base_path: Acorn/Electron
        maps:
          - HDs:
              source_dir: Software/HDs
          - ...SoftwareArchives...:
              source_dir: Software
              filetypes:
                - Tapes: "UEF"
"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_root_and_levels() {
        let config = sample_config();
        assert!(matches!(parse(&config, "/"), Parsed::Root));
        assert!(matches!(parse(&config, ""), Parsed::Root));
        assert!(matches!(parse(&config, "/MiSTer"), Parsed::ClientOnly { .. }));
        assert!(matches!(
            parse(&config, "/MiSTer/AcornElectron"),
            Parsed::SystemOnly { .. }
        ));
    }

    #[test]
    fn matches_static_entry_with_subpath() {
        let config = sample_config();
        match parse(&config, "/MiSTer/AcornElectron/HDs/sub/hoglet.vhd") {
            Parsed::InSystem {
                entry_name,
                target: MapTarget::Entry(MapEntry::Static { .. }),
                subpath,
                ..
            } => {
                assert_eq!(entry_name, "HDs");
                assert_eq!(subpath, vec!["sub", "hoglet.vhd"]);
            }
            other => panic!("unexpected parse {other:?}"),
        }
    }

    #[test]
    fn matches_dynamic_folder() {
        let config = sample_config();
        match parse(&config, "/MiSTer/AcornElectron/Tapes/game.uef") {
            Parsed::InSystem {
                target: MapTarget::DynamicFolder { entry, .. },
                subpath,
                ..
            } => {
                assert_eq!(entry.folder, "Tapes");
                assert_eq!(subpath, vec!["game.uef"]);
            }
            other => panic!("unexpected parse {other:?}"),
        }
    }

    #[test]
    fn dynamic_folder_name_is_case_sensitive() {
        let config = sample_config();
        assert!(matches!(
            parse(&config, "/MiSTer/AcornElectron/tapes"),
            Parsed::InSystem {
                target: MapTarget::Passthrough,
                ..
            }
        ));
    }

    #[test]
    fn unknown_client_or_system_is_not_found() {
        let config = sample_config();
        assert!(matches!(parse(&config, "/RetroArch"), Parsed::NotFound));
        assert!(matches!(
            parse(&config, "/MiSTer/BBCMicro/Tapes"),
            Parsed::NotFound
        ));
    }

    #[test]
    fn traversal_components_never_parse() {
        let config = sample_config();
        assert!(matches!(
            parse(&config, "/MiSTer/AcornElectron/HDs/../../etc"),
            Parsed::NotFound
        ));
        assert!(matches!(
            parse(&config, "/MiSTer/./AcornElectron"),
            Parsed::NotFound
        ));
    }

    #[test]
    fn native_passthrough_parses() {
        let config = sample_config();
        match parse(&config, "/Native/Acorn/Electron") {
            Parsed::Native { subpath } => assert_eq!(subpath, vec!["Acorn", "Electron"]),
            other => panic!("unexpected parse {other:?}"),
        }
    }
}
