//! TransFS FUSE layer.
//!
//! Presents the virtual view computed by `transfs-mapping` as a read-only
//! FUSE mount:
//! - [`TransFs`] implements the `fuser::Filesystem` trait,
//! - [`InodeTable`] tracks kernel-visible identities,
//! - [`mount`]/[`unmount`] manage the background session.

pub mod error;
pub mod filesystem;
pub mod handle;
pub mod inode;
pub mod inode_entry;

use std::sync::Arc;

pub use error::FsError;
pub use filesystem::TransFs;
pub use fuser::BackgroundSession;
use fuser::MountOption;
pub use inode::InodeTable;
pub use inode_entry::{Backing, InodeEntry, InodeNumber};
use tracing::{debug, info};
use transfs_mapping::Engine;

/// Mount TransFS at the engine's configured mountpoint.
///
/// The filesystem runs in a background thread; it stays mounted as long
/// as the returned session lives, and dropping the session unmounts.
pub fn mount(engine: Arc<Engine>) -> Result<BackgroundSession, FsError> {
    let mount_point = engine.config().mountpoint.clone();

    info!(mount_point = %mount_point.display(), "preparing to mount TransFS");

    if !mount_point.exists() {
        return Err(FsError::NotFound(format!(
            "mount point does not exist: {}",
            mount_point.display()
        )));
    }
    if !mount_point.is_dir() {
        return Err(FsError::NotADirectory(format!(
            "mount point is not a directory: {}",
            mount_point.display()
        )));
    }

    let filesystem = TransFs::new(engine);

    let mount_options = [
        MountOption::RO,
        MountOption::AutoUnmount,
        MountOption::FSName("transfs".to_string()),
        MountOption::Subtype("transfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ];
    debug!(options = ?mount_options, "mounting FUSE filesystem");

    let session = fuser::spawn_mount2(filesystem, &mount_point, &mount_options).map_err(|e| {
        FsError::Io(format!(
            "failed to mount TransFS at {}: {e}",
            mount_point.display()
        ))
    })?;

    info!(mount_point = %mount_point.display(), "TransFS mounted");
    Ok(session)
}

/// Unmount by dropping the background session.
pub fn unmount(session: BackgroundSession) {
    info!("unmounting TransFS");
    drop(session);
    info!("TransFS unmounted");
}
