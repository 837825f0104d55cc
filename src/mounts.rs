//! Bind mount assembly and teardown for the chroot.
//!
//! The mount order is fixed: the proc pseudo-filesystem first, then the two
//! recursively bound kernel trees (`/sys`, `/dev`), and the caller's bind
//! directory last, since that one is the most likely to be in a transient
//! state and must not block the others. Unmounting walks the same list in
//! exact reverse order; on kernels with shared mount propagation any other
//! order can orphan nested mounts.
//!
//! Both directions are idempotent: targets that are already (un)mounted are
//! skipped, so a partially provisioned root can be re-run safely.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ProvisionError;
use crate::process::Cmd;

/// How a binding is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Kernel pseudo-filesystem (`mount -t proc`).
    Proc,
    /// Recursive bind (`mount --rbind`), carries submounts along.
    Rbind,
    /// Plain bind (`mount --bind`).
    Bind,
}

/// One host-to-chroot mount binding.
#[derive(Debug, Clone)]
pub struct MountBinding {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: MountKind,
}

/// The fixed, ordered set of bindings for a chroot at `chroot_dir` with the
/// caller's `bind_dir` mapped to the same path inside.
pub fn bindings(chroot_dir: &Path, bind_dir: &Path) -> Vec<MountBinding> {
    let inside = bind_dir.strip_prefix("/").unwrap_or(bind_dir);

    vec![
        MountBinding {
            source: PathBuf::from("none"),
            target: chroot_dir.join("proc"),
            kind: MountKind::Proc,
        },
        MountBinding {
            source: PathBuf::from("/sys"),
            target: chroot_dir.join("sys"),
            kind: MountKind::Rbind,
        },
        MountBinding {
            source: PathBuf::from("/dev"),
            target: chroot_dir.join("dev"),
            kind: MountKind::Rbind,
        },
        MountBinding {
            source: bind_dir.to_path_buf(),
            target: chroot_dir.join(inside),
            kind: MountKind::Bind,
        },
    ]
}

/// Establish all bindings in order, skipping targets that are already
/// mounted.
pub fn mount_all(chroot_dir: &Path, bind_dir: &Path) -> Result<(), ProvisionError> {
    for binding in bindings(chroot_dir, bind_dir) {
        // Re-read per binding: each successful mount changes the table.
        if target_mounted(&binding.target)? {
            println!("  {} already mounted, skipping", binding.target.display());
            continue;
        }

        fs::create_dir_all(&binding.target).map_err(|e| ProvisionError::Mount {
            op: "mkdir",
            target: binding.target.clone(),
            reason: e.to_string(),
        })?;

        let cmd = match binding.kind {
            MountKind::Proc => Cmd::new("mount")
                .args(["-t", "proc"])
                .arg_path(&binding.source)
                .arg_path(&binding.target),
            MountKind::Rbind => Cmd::new("mount")
                .arg("--rbind")
                .arg_path(&binding.source)
                .arg_path(&binding.target),
            MountKind::Bind => Cmd::new("mount")
                .arg("--bind")
                .arg_path(&binding.source)
                .arg_path(&binding.target),
        };

        let result = cmd.allow_fail().run().map_err(|e| ProvisionError::Mount {
            op: "mount",
            target: binding.target.clone(),
            reason: e.to_string(),
        })?;

        if !result.success() {
            return Err(ProvisionError::Mount {
                op: "mount",
                target: binding.target,
                reason: result.stderr_trimmed().to_string(),
            });
        }

        println!("  mounted {}", binding.target.display());
    }

    Ok(())
}

/// Tear down all bindings in exact reverse order of [`mount_all`], then
/// sweep any mount point still left under the root.
///
/// The sweep covers binds the current plan does not know about, e.g. a bind
/// directory from an earlier provisioning run with a different working
/// directory. Without it a later tree removal would descend into a live
/// mount and delete host files through it.
pub fn unmount_all(chroot_dir: &Path, bind_dir: &Path) -> Result<(), ProvisionError> {
    for binding in bindings(chroot_dir, bind_dir).iter().rev() {
        if !target_mounted(&binding.target)? {
            continue;
        }
        // Recursive binds carry submounts that must go with them.
        umount(&binding.target, binding.kind == MountKind::Rbind)?;
    }

    unmount_tree(chroot_dir)
}

/// Unmount every mount point at or below `root`, most recently mounted
/// first. A no-op when nothing is mounted there.
pub fn unmount_tree(root: &Path) -> Result<(), ProvisionError> {
    for point in tree_mount_points(root)? {
        umount(&point, false)?;
    }
    Ok(())
}

/// Mount points currently live at or below `root`, in unmount order.
pub fn tree_mount_points(root: &Path) -> Result<Vec<PathBuf>, ProvisionError> {
    let table = read_mount_table(root)?;
    Ok(mount_points_under(&table, root))
}

/// Pure filter of a `/proc/mounts`-formatted table: every mount point equal
/// to or below `root`, reversed so the most recently mounted comes first
/// (the table lists mounts in creation order).
pub fn mount_points_under(proc_mounts: &str, root: &Path) -> Vec<PathBuf> {
    let mut points: Vec<PathBuf> = proc_mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_point)
        .map(PathBuf::from)
        .filter(|point| point.starts_with(root))
        .collect();
    points.reverse();
    points
}

/// Run `umount` against a single target.
fn umount(target: &Path, recursive: bool) -> Result<(), ProvisionError> {
    let mut cmd = Cmd::new("umount");
    if recursive {
        cmd = cmd.arg("-R");
    }

    let result = cmd
        .arg_path(target)
        .allow_fail()
        .run()
        .map_err(|e| ProvisionError::Mount {
            op: "umount",
            target: target.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !result.success() {
        return Err(ProvisionError::Mount {
            op: "umount",
            target: target.to_path_buf(),
            reason: result.stderr_trimmed().to_string(),
        });
    }

    println!("  unmounted {}", target.display());
    Ok(())
}

/// Check whether `target` appears as a mount point in `/proc/mounts`.
fn target_mounted(target: &Path) -> Result<bool, ProvisionError> {
    Ok(is_mounted(&read_mount_table(target)?, target))
}

fn read_mount_table(target: &Path) -> Result<String, ProvisionError> {
    fs::read_to_string("/proc/mounts").map_err(|e| ProvisionError::Mount {
        op: "read /proc/mounts",
        target: target.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Pure lookup of `target` in a `/proc/mounts`-formatted table.
///
/// The second whitespace-separated field of each line is the mount point,
/// with spaces, tabs, newlines, and backslashes octal-escaped.
pub fn is_mounted(proc_mounts: &str, target: &Path) -> bool {
    let wanted = target.to_string_lossy();
    proc_mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_point)
        .any(|point| point == wanted)
}

/// Decode the octal escapes the kernel uses in `/proc/mounts` fields.
fn unescape_mount_point(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 {
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}
