//! Provisioning orchestration.
//!
//! Drives the full sequence exactly once per run: verified tool fetch,
//! architecture resolution, conditional emulation setup, root bootstrap,
//! mount assembly, entry-script generation, and the first-run step through
//! the generated script. Strictly sequential; any failure aborts the rest.
//! There is no automatic rollback of mounts or partial root content —
//! teardown is the caller's job (`--destroy`).

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use crate::arch;
use crate::bootstrap;
use crate::config::{Config, APK_KEYS_SHA256, APK_KEYS_URI};
use crate::enter;
use crate::errors::ProvisionError;
use crate::fetch;
use crate::mounts;
use crate::process::Cmd;
use crate::qemu;

/// Run the whole provisioning sequence against `config.chroot_dir`.
///
/// Callers must not run two provisioning sequences against the same root
/// concurrently; mount and apk database operations are not concurrency-safe.
pub fn run(config: &Config) -> Result<()> {
    check_privilege()?;
    config.print();

    println!("\n==> Fetching apk-tools and signing keys");
    let apk_static = fetch_tools(config)?;

    let host = arch::host_arch();
    let emulated = arch::needs_emulation(&host, &config.arch);
    if emulated {
        println!("\n==> Setting up {} emulation (host is {})", config.arch, host);
        qemu::ensure(&config.arch, &config.chroot_dir)?;
    }

    println!("\n==> Bootstrapping root at {}", config.chroot_dir.display());
    bootstrap::bootstrap(
        &config.chroot_dir,
        &apk_static,
        &config.mirror,
        &config.branch,
        &config.extra_repos,
        emulated.then_some(config.arch.as_str()),
    )?;

    println!("\n==> Mounting filesystems");
    mounts::mount_all(&config.chroot_dir, &config.bind_dir)?;

    println!("\n==> Generating entry script");
    let script = enter::generate(&config.keep_vars)?;
    let script_path = enter::write_script(&config.chroot_dir, &script)?;
    println!("  {}", script_path.display());

    println!("\n==> First run: installing packages");
    first_run(config, &script_path)?;

    println!("\nDone. Enter the chroot with: {}", script_path.display());
    Ok(())
}

/// Pre-flight: mounts and chroot transitions need euid 0. Checked before
/// any side effect.
pub fn check_privilege() -> Result<(), ProvisionError> {
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(ProvisionError::Privilege { euid });
    }
    Ok(())
}

/// Fetch the pinned static apk binary into the temp dir and the Alpine
/// signing keys into `<chroot>/etc/apk/keys`, all digest-verified.
fn fetch_tools(config: &Config) -> Result<std::path::PathBuf> {
    fs::create_dir_all(&config.temp_dir)
        .with_context(|| format!("Failed to create {}", config.temp_dir.display()))?;

    let uri = config.apk_tools_uri();
    let Some(digest) = config.apk_tools_sha256() else {
        bail!(
            "No pinned apk.static digest for architecture '{}'; \
             set APK_TOOLS_URI and APK_TOOLS_SHA256",
            config.arch
        );
    };

    let apk_static = fetch::fetch(&uri, &digest, &config.temp_dir)?;
    fs::set_permissions(&apk_static, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to mark {} executable", apk_static.display()))?;
    println!("  {}", apk_static.display());

    let keys_dir = config.chroot_dir.join("etc/apk/keys");
    fs::create_dir_all(&keys_dir)
        .with_context(|| format!("Failed to create {}", keys_dir.display()))?;
    for (name, digest) in APK_KEYS_SHA256 {
        let key = fetch::fetch(&format!("{APK_KEYS_URI}/{name}"), digest, &keys_dir)?;
        println!("  {}", key.display());
    }

    Ok(apk_static)
}

/// First entry into the new root: refresh the package index, install the
/// requested package set, and mirror the bind directory's owning host user
/// as an unprivileged account.
fn first_run(config: &Config, script_path: &Path) -> Result<()> {
    let install = format!("apk update && apk add {}", config.packages.join(" "));
    Cmd::new(script_path.to_string_lossy())
        .args(["sh", "-c"])
        .arg(&install)
        .error_msg("First-run package installation failed")
        .run_interactive()?;

    let owner_uid = fs::metadata(&config.bind_dir)
        .with_context(|| format!("Failed to stat {}", config.bind_dir.display()))?
        .uid();

    if !should_create_user(owner_uid) {
        return Ok(());
    }

    let name = owner_name(owner_uid).unwrap_or_else(|| "user".to_string());
    println!("  creating user {name} (uid {owner_uid})");

    let adduser = format!("adduser -u {owner_uid} -s /bin/sh -D {name}");
    let result = Cmd::new(script_path.to_string_lossy())
        .args(["sh", "-c"])
        .arg(&adduser)
        .allow_fail()
        .run()?;

    if !result.success() {
        // A pre-existing account is already-satisfied, not an error.
        let stderr = result.stderr_trimmed();
        if stderr.contains("in use") || stderr.contains("already exists") {
            println!("  user {name} already exists");
        } else {
            bail!(
                "Failed to create user {name} in chroot (exit code {}):\n{stderr}",
                result.code()
            );
        }
    }

    Ok(())
}

/// An unprivileged account is mirrored only for non-root bind dir owners.
pub fn should_create_user(owner_uid: u32) -> bool {
    owner_uid != 0
}

/// Resolve a host uid to its account name through the system user database.
fn owner_name(uid: u32) -> Option<String> {
    let result = Cmd::new("getent")
        .args(["passwd", &uid.to_string()])
        .allow_fail()
        .run()
        .ok()?;

    if !result.success() {
        return None;
    }
    result
        .stdout_trimmed()
        .split(':')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_create_user_for_unprivileged_owner() {
        assert!(should_create_user(1000));
        assert!(should_create_user(65534));
    }

    #[test]
    fn test_no_user_created_for_root_owner() {
        assert!(!should_create_user(0));
    }
}
