//! Check command: validate the configuration and print the virtual tree.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use transfs_core::{Config, MapEntry};

/// Validate the configuration and show what would be mounted
#[derive(Debug, Args)]
pub struct CheckCommand {}

impl CheckCommand {
    pub fn execute(&self, config_path: &Path) -> Result<()> {
        let config = Config::load(config_path)
            .with_context(|| format!("loading configuration from {}", config_path.display()))?;

        println!("mountpoint: {}", config.mountpoint.display());
        println!("filestore:  {}", config.filestore.display());
        if let Some(cache_dir) = &config.cache_dir {
            println!("cache_dir:  {}", cache_dir.display());
        }

        for client in &config.clients {
            println!("{}/", client.name);
            for system in &client.systems {
                println!("  {}/  ({})", system.name, system.local_base_path.display());
                for entry in &system.maps {
                    match entry {
                        MapEntry::Static { name, source_dir } => {
                            println!("    {name}/  -> {}", source_dir.display());
                        }
                        MapEntry::DefaultSource {
                            name,
                            source_filename,
                            unzip,
                            ..
                        } => {
                            let suffix = if *unzip { " (unzip)" } else { "" };
                            println!("    {name}  -> {}{suffix}", source_filename.display());
                        }
                        MapEntry::DirectMount { name, mount, .. } => {
                            println!("    {name}/  => {}", mount.display());
                        }
                        MapEntry::Dynamic(dynamic) => {
                            for ft in &dynamic.filetypes {
                                let exts: Vec<String> = ft
                                    .specs
                                    .iter()
                                    .map(|s| {
                                        if s.is_alias() {
                                            format!("{}:{}", s.source_ext(), s.virtual_ext())
                                        } else {
                                            s.source_ext().to_string()
                                        }
                                    })
                                    .collect();
                                println!(
                                    "    {}/  ~ {}/<{}>  [{:?}]",
                                    ft.folder,
                                    dynamic.source_dir.display(),
                                    exts.join("|"),
                                    dynamic.zip_mode
                                );
                            }
                        }
                    }
                }
            }
        }

        println!("configuration OK");
        Ok(())
    }
}
