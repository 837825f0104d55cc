//! Root bootstrap: repository configuration, DNS config, and the initial
//! apk database with the base package set.
//!
//! Runs against the target directory from the outside (no chroot transition
//! yet), using the verified static apk binary. A failed apk invocation is
//! fatal with no partial-root recovery; the caller discards the directory
//! and retries.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::ProvisionError;
use crate::process::Cmd;

/// Base package set installed into every new root.
const BASE_PACKAGES: &str = "alpine-base";

/// Initialize `chroot_dir` into a minimal installable root.
///
/// `arch` is passed through to apk only when emulation is in effect, so a
/// native bootstrap never pins a foreign package architecture by accident.
pub fn bootstrap(
    chroot_dir: &Path,
    apk_static: &Path,
    mirror: &str,
    branch: &str,
    extra_repos: &[String],
    arch: Option<&str>,
) -> Result<()> {
    write_repositories(chroot_dir, mirror, branch, extra_repos)?;
    copy_resolv_conf(chroot_dir)?;
    init_root(chroot_dir, apk_static, arch)?;
    Ok(())
}

/// Write `etc/apk/repositories`: main and community channels for the
/// configured mirror and branch, then the caller's extra repositories
/// verbatim. Order matters — apk resolves conflicts by repository priority.
pub fn write_repositories(
    chroot_dir: &Path,
    mirror: &str,
    branch: &str,
    extra_repos: &[String],
) -> Result<PathBuf> {
    let apk_dir = chroot_dir.join("etc/apk");
    fs::create_dir_all(&apk_dir)
        .with_context(|| format!("Failed to create {}", apk_dir.display()))?;

    let mirror = mirror.trim_end_matches('/');
    let mut content = format!("{mirror}/{branch}/main\n{mirror}/{branch}/community\n");
    for repo in extra_repos {
        content.push_str(repo);
        content.push('\n');
    }

    let path = apk_dir.join("repositories");
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}

/// Copy the host's name-resolution config into the root so network access
/// works as soon as the root exists.
pub fn copy_resolv_conf(chroot_dir: &Path) -> Result<()> {
    copy_resolv_conf_from(Path::new("/etc/resolv.conf"), chroot_dir)
}

/// Inner copy, parameterized over the host file for testing.
pub fn copy_resolv_conf_from(host_file: &Path, chroot_dir: &Path) -> Result<()> {
    if !host_file.exists() {
        // A host without resolv.conf (e.g. pure systemd-resolved stub setups
        // inside containers) still gets a usable root; DNS just needs manual
        // configuration later.
        println!("  {} not found, skipping DNS config", host_file.display());
        return Ok(());
    }

    let etc = chroot_dir.join("etc");
    fs::create_dir_all(&etc).with_context(|| format!("Failed to create {}", etc.display()))?;

    let dest = etc.join("resolv.conf");
    fs::copy(host_file, &dest)
        .with_context(|| format!("Failed to copy {} to {}", host_file.display(), dest.display()))?;
    Ok(())
}

/// Run the static apk binary to create the package database and install the
/// base set.
pub fn init_root(
    chroot_dir: &Path,
    apk_static: &Path,
    arch: Option<&str>,
) -> Result<(), ProvisionError> {
    let mut cmd = Cmd::new(apk_static.to_string_lossy())
        .arg("--root")
        .arg_path(chroot_dir)
        .args(["--keys-dir", "etc/apk/keys"])
        .args(["--update-cache", "--initdb", "--no-progress"]);

    if let Some(arch) = arch {
        cmd = cmd.args(["--arch", arch]);
    }

    let result = cmd
        .args(["add", BASE_PACKAGES])
        .allow_fail()
        .run()
        .map_err(|e| ProvisionError::Bootstrap(e.to_string()))?;

    if !result.success() {
        return Err(ProvisionError::Bootstrap(format!(
            "apk failed to initialize {} (exit code {}):\n{}",
            chroot_dir.display(),
            result.code(),
            result.stderr_trimmed()
        )));
    }

    println!("  base system installed into {}", chroot_dir.display());
    Ok(())
}
