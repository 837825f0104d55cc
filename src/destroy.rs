//! Chroot teardown.

use anyhow::{Context, Result};
use std::fs;

use crate::config::Config;
use crate::errors::ProvisionError;
use crate::mounts;
use crate::provision;

/// Remove the chroot: unmount every binding in reverse creation order, then
/// delete the directory tree.
///
/// Teardown is restartable: if the tree removal fails after the unmounts
/// succeeded, a re-run skips the (now absent) mounts and retries the
/// removal.
pub fn destroy(config: &Config) -> Result<()> {
    provision::check_privilege()?;

    if !config.chroot_dir.exists() {
        println!("Nothing to destroy at {}", config.chroot_dir.display());
        return Ok(());
    }

    println!("==> Unmounting filesystems");
    mounts::unmount_all(&config.chroot_dir, &config.bind_dir)?;

    // Removal must never run while anything is still mounted under the
    // root: a recursive delete would descend through a live bind into the
    // host filesystem.
    let live = mounts::tree_mount_points(&config.chroot_dir)?;
    if let Some(point) = live.first() {
        return Err(ProvisionError::Mount {
            op: "verify",
            target: point.clone(),
            reason: "still mounted, refusing to remove the tree".to_string(),
        }
        .into());
    }

    println!("==> Removing {}", config.chroot_dir.display());
    fs::remove_dir_all(&config.chroot_dir)
        .with_context(|| format!("Failed to remove {}", config.chroot_dir.display()))?;

    println!("Destroyed.");
    Ok(())
}
