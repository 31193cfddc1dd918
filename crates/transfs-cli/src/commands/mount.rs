//! Mount command.
//!
//! Loads configuration, validates the mount point and FUSE availability,
//! mounts the filesystem, and (in foreground mode) waits for SIGINT or
//! SIGTERM before unmounting. Exit status is non-zero on mount failure or
//! a fatal configuration error.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;
use transfs_core::Config;
use transfs_fuse::{mount, unmount};
use transfs_mapping::Engine;

/// Mount the TransFS virtual filesystem
#[derive(Debug, Args)]
pub struct MountCommand {
    /// Run in foreground and unmount on Ctrl+C / SIGTERM
    #[arg(long, short = 'f')]
    pub foreground: bool,
}

impl MountCommand {
    pub async fn execute(&self, config_path: &Path) -> Result<()> {
        let config = Config::load(config_path)
            .with_context(|| format!("loading configuration from {}", config_path.display()))?;
        info!(config_path = %config_path.display(), "loaded configuration");

        let mount_point = config.mountpoint.clone();
        if !mount_point.exists() {
            info!(mount_point = %mount_point.display(), "creating mount point directory");
            std::fs::create_dir_all(&mount_point)
                .context("failed to create mount point directory")?;
        }

        if !Path::new("/dev/fuse").exists() {
            anyhow::bail!(
                "FUSE is not available (/dev/fuse does not exist). \
                 Install fuse3 and make sure the kernel module is loaded."
            );
        }

        if let Some(cache_dir) = &config.cache_dir {
            if !cache_dir.exists() {
                info!(cache_dir = %cache_dir.display(), "creating cache directory");
                std::fs::create_dir_all(cache_dir).context("failed to create cache directory")?;
            }
        }

        let engine = Arc::new(Engine::new(Arc::new(config)).context("initialising engine")?);
        let session = mount(engine).context("failed to mount TransFS")?;

        if self.foreground {
            info!("running in foreground; press Ctrl+C to unmount and exit");

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                signal_token.cancel();
            });

            shutdown.cancelled().await;
            info!("shutdown signal received, unmounting");
            unmount(session);
        } else {
            info!(
                mount_point = %mount_point.display(),
                "mounted in background; run 'transfs unmount' to detach"
            );
            // Keep the mount alive past process exit of this command.
            std::mem::forget(session);
        }

        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
