//! Unmount command.
//!
//! Uses `fusermount3 -u` (falling back to `fusermount`) to detach the
//! mount; `--force` performs a lazy unmount for busy filesystems.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use transfs_core::Config;

/// Unmount the TransFS virtual filesystem
#[derive(Debug, Args)]
pub struct UnmountCommand {
    /// Lazy unmount even if the filesystem is busy
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Override the mount point from the configuration
    #[arg(long, short = 'p', value_name = "PATH")]
    pub path: Option<PathBuf>,
}

impl UnmountCommand {
    pub async fn execute(&self, config_path: &Path) -> Result<()> {
        let mount_point = match &self.path {
            Some(path) => path.clone(),
            None => {
                let config = Config::load(config_path).with_context(|| {
                    format!("loading configuration from {}", config_path.display())
                })?;
                config.mountpoint
            }
        };

        if !mount_point.exists() {
            anyhow::bail!("mount point '{}' does not exist", mount_point.display());
        }

        let fusermount = if which_exists("fusermount3") {
            "fusermount3"
        } else {
            "fusermount"
        };

        let mut args = vec!["-u"];
        if self.force {
            args.push("-z");
        }

        info!(
            command = %format!("{fusermount} {} {}", args.join(" "), mount_point.display()),
            "unmounting"
        );

        let output = Command::new(fusermount)
            .args(&args)
            .arg(&mount_point)
            .output()
            .context("failed to execute fusermount; is FUSE installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            if message.contains("busy") {
                anyhow::bail!(
                    "filesystem at {} is busy; retry with --force for a lazy unmount",
                    mount_point.display()
                );
            }
            anyhow::bail!("failed to unmount {}: {message}", mount_point.display());
        }

        info!(mount_point = %mount_point.display(), "unmounted");
        Ok(())
    }
}

fn which_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
