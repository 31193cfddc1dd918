//! End-to-end mapping tests over a real temporary filestore.
//!
//! Each test builds the physical layout it needs under a tempdir, loads an
//! inline configuration pointing at it, and drives resolve/list the way the
//! FUSE layer does.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use transfs_core::Config;
use transfs_mapping::{DirEntryOut, Engine, LocatedKind, Resolution};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

struct Fixture {
    _tmp: tempfile::TempDir,
    engine: Engine,
}

impl Fixture {
    fn new(config_yaml: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let filestore = tmp.path().join("filestore");
        fs::create_dir_all(filestore.join("Native")).unwrap();

        let yaml = config_yaml.replace("__FILESTORE__", &filestore.display().to_string());
        let config = Config::from_yaml(&yaml).unwrap();
        let engine = Engine::new(Arc::new(config)).unwrap();
        Self { _tmp: tmp, engine }
    }

    fn native(&self) -> PathBuf {
        self.engine.config().native_root()
    }

    fn write_file(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.native().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn write_zip(&self, rel: &str, members: &[(&str, &[u8])]) -> PathBuf {
        let path = self.native().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
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

    fn names(&self, vpath: &str) -> Vec<String> {
        self.engine
            .list(vpath)
            .unwrap()
            .unwrap_or_else(|| panic!("{vpath} should list"))
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    fn listing(&self, vpath: &str) -> Vec<DirEntryOut> {
        self.engine.list(vpath).unwrap().unwrap()
    }

    /// Read a resolved virtual file fully, through whichever backing it has.
    fn read_all(&self, vpath: &str) -> Vec<u8> {
        let located = self
            .engine
            .resolve(vpath)
            .unwrap()
            .unwrap_or_else(|| panic!("{vpath} should resolve"));
        match &located.resolution {
            Resolution::RealFile(path) => fs::read(path).unwrap(),
            Resolution::ArchiveMember { archive, member } => {
                let snap = self.engine.archives().snapshot(archive).unwrap();
                self.engine
                    .archives()
                    .read_member(&snap, member, 0, located.size as u32)
                    .unwrap()
            }
            other => panic!("{vpath} is not a file: {other:?}"),
        }
    }
}

const ACORN_CONFIG: &str = r#"
mountpoint: /mnt/transfs
filestore: __FILESTORE__
clients:
  - name: MiSTer
    systems:
      - name: AcornAtom
        manufacturer: Acorn
        canonical_system_name: Atom
        local_base_path: Acorn/Atom
        maps:
          - HDs:
              source_dir: Software/HDs
      - name: AcornElectron
        manufacturer: Acorn
        canonical_system_name: Electron
        local_base_path: Acorn/Electron
        maps:
          - boot.vhd:
              source_filename: BIOS/boot.zip
              unzip: true
          - ...SoftwareArchives...:
              source_dir: Software
              supports_zip: true
              zip_mode: flatten
              filetypes:
                - Tapes: "UEF"
                - HDs: "MMB, VHD"
                - ROMs: "BIN:ROM"
                - FDs: "SSD"
"#;

const COLLECTIONS_CONFIG: &str = r#"
mountpoint: /mnt/transfs
filestore: __FILESTORE__
clients:
  - name: MiSTer
    systems:
      - name: BBCMicro
        local_base_path: Acorn/BBCMicro
        maps:
          - ...SoftwareArchives...:
              source_dir: Software
              supports_zip: true
              zip_mode: hierarchical
              filetypes:
                - Collections: "ZIP"
"#;

// E1: static map passthrough.
#[test]
fn static_map_passthrough() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Atom/Software/HDs/hoglet.vhd", b"HELLOWORLD");

    assert_eq!(fx.names("/MiSTer/AcornAtom/HDs"), vec!["hoglet.vhd"]);

    let located = fx
        .engine
        .resolve("/MiSTer/AcornAtom/HDs/hoglet.vhd")
        .unwrap()
        .unwrap();
    assert_eq!(located.kind, LocatedKind::File);
    assert_eq!(located.size, 10);
    assert_eq!(&fx.read_all("/MiSTer/AcornAtom/HDs/hoglet.vhd")[..5], b"HELLO");
}

// E2: dynamic folders list per extension.
#[test]
fn dynamic_folders_list_their_extensions() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/UEF/game.uef", b"uefdata");
    fx.write_file("Acorn/Electron/Software/MMB/BEEB.mmb", b"mmbdata");

    assert_eq!(fx.names("/MiSTer/AcornElectron/Tapes"), vec!["game.uef"]);
    assert_eq!(fx.names("/MiSTer/AcornElectron/HDs"), vec!["BEEB.mmb"]);
}

// E3: extension aliasing in listings and reads.
#[test]
fn extension_alias_renames_and_reads() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/BIN/TEST.BIN", b"DEAD");

    assert_eq!(fx.names("/MiSTer/AcornElectron/ROMs"), vec!["TEST.ROM"]);
    assert_eq!(fx.read_all("/MiSTer/AcornElectron/ROMs/TEST.ROM"), b"DEAD");
}

// E4: flatten hides a single-match archive behind its member.
#[test]
fn flatten_single_match_collapses_archive() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_zip(
        "Acorn/Electron/Software/SSD/Elite.zip",
        &[("Elite.ssd", b"ELITEBYTES")],
    );

    let names = fx.names("/MiSTer/AcornElectron/FDs");
    assert_eq!(names, vec!["Elite.ssd"]);
    assert!(!names.contains(&"Elite.zip".to_string()));

    assert_eq!(fx.read_all("/MiSTer/AcornElectron/FDs/Elite.ssd"), b"ELITEBYTES");
    // The hidden archive name does not resolve.
    assert!(fx
        .engine
        .resolve("/MiSTer/AcornElectron/FDs/Elite.zip")
        .unwrap()
        .is_none());
}

// E5: hierarchical archives browse as directories.
#[test]
fn hierarchical_archive_is_browsable() {
    let fx = Fixture::new(COLLECTIONS_CONFIG);
    fx.write_zip(
        "Acorn/BBCMicro/Software/ZIP/TOSEC.zip",
        &[("Disk1/game.dsk", b"disk-one"), ("Disk2/game.dsk", b"disk-two")],
    );

    assert_eq!(fx.names("/MiSTer/BBCMicro/Collections"), vec!["TOSEC.zip"]);
    assert_eq!(
        fx.names("/MiSTer/BBCMicro/Collections/TOSEC.zip"),
        vec!["Disk1", "Disk2"]
    );
    assert_eq!(
        fx.names("/MiSTer/BBCMicro/Collections/TOSEC.zip/Disk1"),
        vec!["game.dsk"]
    );
    assert_eq!(
        fx.read_all("/MiSTer/BBCMicro/Collections/TOSEC.zip/Disk1/game.dsk"),
        b"disk-one"
    );
}

// E6: semantic-folder fallback when no extension directory exists.
#[test]
fn semantic_folder_fallback() {
    let fx = Fixture::new(COLLECTIONS_CONFIG);
    fx.write_zip(
        "Acorn/BBCMicro/Software/Collections/foo.zip",
        &[("inner.dsk", b"inner")],
    );

    let names = fx.names("/MiSTer/BBCMicro/Collections");
    assert!(names.contains(&"foo.zip".to_string()), "{names:?}");
}

// Default-source: a virtual filename backed by an archive member.
#[test]
fn default_source_resolves_zip_member_by_basename() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_zip(
        "Acorn/Electron/BIOS/boot.zip",
        &[("images/boot.vhd", b"BOOTIMAGE"), ("readme.txt", b"hi")],
    );

    let located = fx
        .engine
        .resolve("/MiSTer/AcornElectron/boot.vhd")
        .unwrap()
        .unwrap();
    assert_eq!(located.kind, LocatedKind::File);
    assert_eq!(located.size, 9);
    assert!(matches!(
        &located.resolution,
        Resolution::ArchiveMember { member, .. } if member == "images/boot.vhd"
    ));
    assert_eq!(fx.read_all("/MiSTer/AcornElectron/boot.vhd"), b"BOOTIMAGE");

    let system_names = fx.names("/MiSTer/AcornElectron");
    assert!(system_names.contains(&"boot.vhd".to_string()));
}

// Property 1: every prefix of a resolvable path is a resolvable directory.
#[test]
fn prefixes_of_resolvable_paths_are_directories() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/UEF/game.uef", b"x");

    let full = "/MiSTer/AcornElectron/Tapes/game.uef";
    assert!(fx.engine.resolve(full).unwrap().is_some());

    let mut prefix = String::new();
    for segment in full.split('/').filter(|s| !s.is_empty()) {
        let parent = if prefix.is_empty() { "/" } else { &prefix };
        let located = fx
            .engine
            .resolve(parent)
            .unwrap()
            .unwrap_or_else(|| panic!("prefix {parent} should resolve"));
        assert!(located.is_dir(), "prefix {parent} should be a directory");
        prefix.push('/');
        prefix.push_str(segment);
    }
}

// Property 4: listings are deterministic and ordered.
#[test]
fn listings_are_deterministic_and_ordered() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/UEF/beta.uef", b"b");
    fx.write_file("Acorn/Electron/Software/UEF/Alpha.uef", b"a");
    fx.write_file("Acorn/Electron/Software/UEF/Sub/nested.uef", b"n");

    let first = fx.listing("/MiSTer/AcornElectron/Tapes");
    let second = fx.listing("/MiSTer/AcornElectron/Tapes");
    assert_eq!(first, second);

    let names: Vec<&str> = first.iter().map(|e| e.name.as_str()).collect();
    // Folders first, then case-insensitive lexicographic.
    assert_eq!(names, vec!["Sub", "Alpha.uef", "beta.uef"]);
}

// Property 11: extension matching is case-insensitive.
#[test]
fn extension_matching_ignores_case() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/SSD/upper.SSD", b"U");
    fx.write_file("Acorn/Electron/Software/SSD/lower.ssd", b"l");
    fx.write_file("Acorn/Electron/Software/SSD/mixed.Ssd", b"m");

    let names = fx.names("/MiSTer/AcornElectron/FDs");
    assert_eq!(names, vec!["lower.ssd", "mixed.Ssd", "upper.SSD"]);
}

// Tie-break: a real file shadows an identically named archive member.
#[test]
fn real_file_shadows_archive_member() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/SSD/Foo.ssd", b"REALFILE");
    fx.write_zip(
        "Acorn/Electron/Software/SSD/Foo.zip",
        &[("Foo.ssd", b"ZIPMEMBER")],
    );

    let names = fx.names("/MiSTer/AcornElectron/FDs");
    assert_eq!(names, vec!["Foo.ssd"]);
    assert_eq!(fx.read_all("/MiSTer/AcornElectron/FDs/Foo.ssd"), b"REALFILE");
}

// Boundary 9: flatten hides archives with zero matching members.
#[test]
fn flatten_zero_match_archive_is_hidden() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_zip(
        "Acorn/Electron/Software/SSD/notes.zip",
        &[("readme.txt", b"no disks here")],
    );

    let listing = fx.engine.list("/MiSTer/AcornElectron/FDs").unwrap().unwrap();
    assert!(listing.is_empty(), "{listing:?}");
}

// Flatten with multiple matches browses as a filtered directory.
#[test]
fn flatten_multi_match_archive_browses_filtered() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_zip(
        "Acorn/Electron/Software/SSD/Games.zip",
        &[
            ("GameA.ssd", b"AAAA"),
            ("GameB.ssd", b"BBBB"),
            ("manual.txt", b"ignore me"),
        ],
    );

    assert_eq!(fx.names("/MiSTer/AcornElectron/FDs"), vec!["Games.zip"]);
    assert_eq!(
        fx.names("/MiSTer/AcornElectron/FDs/Games.zip"),
        vec!["GameA.ssd", "GameB.ssd"]
    );
    assert_eq!(
        fx.read_all("/MiSTer/AcornElectron/FDs/Games.zip/GameB.ssd"),
        b"BBBB"
    );
}

// Unknown names and escapes resolve to clean negatives.
#[test]
fn unknown_paths_are_clean_negatives() {
    let fx = Fixture::new(ACORN_CONFIG);
    assert!(fx.engine.resolve("/NoSuchClient").unwrap().is_none());
    assert!(fx
        .engine
        .resolve("/MiSTer/AcornElectron/Tapes/missing.uef")
        .unwrap()
        .is_none());
    assert!(fx
        .engine
        .resolve("/MiSTer/AcornElectron/../../../etc/passwd")
        .unwrap()
        .is_none());
}

// A dynamic folder with no backing directories is excluded at the system
// level and unlistable.
#[test]
fn unbacked_dynamic_folder_is_excluded() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/UEF/game.uef", b"x");

    let names = fx.names("/MiSTer/AcornElectron");
    assert!(names.contains(&"Tapes".to_string()));
    assert!(!names.contains(&"ROMs".to_string()), "{names:?}");
    assert!(fx.engine.list("/MiSTer/AcornElectron/ROMs").unwrap().is_none());
}

// Unmapped real content under the system base stays reachable.
#[test]
fn unmapped_real_entries_appear_at_system_level() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Manuals/guide.pdf", b"pdf");

    let names = fx.names("/MiSTer/AcornElectron");
    assert!(names.contains(&"Manuals".to_string()), "{names:?}");

    assert_eq!(
        fx.names("/MiSTer/AcornElectron/Manuals"),
        vec!["guide.pdf"]
    );
    assert_eq!(fx.read_all("/MiSTer/AcornElectron/Manuals/guide.pdf"), b"pdf");
}

// The Native passthrough exposes the physical tree.
#[test]
fn native_passthrough_lists_physical_tree() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/UEF/game.uef", b"x");

    let root = fx.names("/");
    assert!(root.contains(&"Native".to_string()));
    assert!(root.contains(&"MiSTer".to_string()));

    assert_eq!(fx.names("/Native"), vec!["Acorn"]);
    assert_eq!(fx.names("/Native/Acorn/Electron/Software"), vec!["UEF"]);
}

fn touch_dir(path: &Path) {
    fs::create_dir_all(path).unwrap();
}

// Alias resolution accepts the virtual extension case-insensitively.
#[test]
fn alias_open_matches_virtual_extension_case_insensitively() {
    let fx = Fixture::new(ACORN_CONFIG);
    fx.write_file("Acorn/Electron/Software/BIN/TEST.BIN", b"DEAD");
    touch_dir(&fx.native().join("Acorn/Electron/Software/UEF"));

    assert!(fx
        .engine
        .resolve("/MiSTer/AcornElectron/ROMs/TEST.rom")
        .unwrap()
        .is_some());
    // A different stem does not match.
    assert!(fx
        .engine
        .resolve("/MiSTer/AcornElectron/ROMs/OTHER.ROM")
        .unwrap()
        .is_none());
}
