//! Foreign-architecture emulation setup (qemu-user + binfmt_misc).
//!
//! When the target architecture differs from the host, three things must be
//! true before the static apk binary (itself a target-arch executable) can
//! run: a user-mode qemu emulator exists on the host, the kernel's
//! binfmt_misc registry routes target-arch executables through it, and the
//! emulator is reachable from inside the chroot. Each step is checked before
//! it is performed, so re-runs are no-ops on an already-prepared host.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::arch;
use crate::errors::ProvisionError;
use crate::process::Cmd;

/// Host-side operations emulation setup depends on. A trait seam so the
/// setup flow can be exercised against a scripted host in tests.
pub trait EmulatorHost {
    /// Locate the emulator binary on the host.
    fn find_emulator(&self, qarch: &str) -> Option<PathBuf>;
    /// Install the qemu-user-static package.
    fn install_emulator(&self) -> Result<(), ProvisionError>;
    /// Whether the binfmt_misc entry for `qemu-<qarch>` is enabled.
    fn binfmt_registered(&self, qarch: &str) -> bool;
    /// Enable binfmt registration.
    fn enable_binfmt(&self, qarch: &str) -> Result<(), ProvisionError>;
}

/// Ensure a user-mode emulator for `target_arch` is installed, registered
/// with binfmt_misc, and copied into the chroot's binary search path.
///
/// Must complete before the root bootstrap when emulation is in effect;
/// otherwise the apk invocation fails with an exec-format error.
pub fn ensure(target_arch: &str, chroot_dir: &Path) -> Result<PathBuf, ProvisionError> {
    ensure_with(target_arch, chroot_dir, &HostTools)
}

/// [`ensure`] against an explicit host implementation.
pub fn ensure_with(
    target_arch: &str,
    chroot_dir: &Path,
    host: &dyn EmulatorHost,
) -> Result<PathBuf, ProvisionError> {
    let qarch = arch::qemu_arch(target_arch);

    let emulator = match host.find_emulator(&qarch) {
        Some(path) => path,
        None => {
            println!("  qemu-{qarch} not found on host, installing...");
            host.install_emulator()?;
            host.find_emulator(&qarch).ok_or_else(|| {
                ProvisionError::DependencyInstall(format!(
                    "qemu-{qarch} still not found after installing qemu-user-static"
                ))
            })?
        }
    };
    println!("  emulator: {}", emulator.display());

    if !host.binfmt_registered(&qarch) {
        println!("  binfmt entry for qemu-{qarch} missing, enabling...");
        host.enable_binfmt(&qarch)?;
        if !host.binfmt_registered(&qarch) {
            return Err(ProvisionError::DependencyInstall(format!(
                "binfmt_misc entry qemu-{qarch} is still not enabled"
            )));
        }
    }

    copy_into_root(&emulator, chroot_dir)
}

/// The real host: `which` lookups, the native package manager, and the
/// kernel's binfmt_misc registry.
pub struct HostTools;

impl EmulatorHost for HostTools {
    /// Prefers the static build; a dynamically linked qemu cannot run once
    /// copied into the chroot.
    fn find_emulator(&self, qarch: &str) -> Option<PathBuf> {
        for name in emulator_names(qarch) {
            if let Ok(path) = which::which(&name) {
                return Some(path);
            }
        }
        None
    }

    fn install_emulator(&self) -> Result<(), ProvisionError> {
        let attempt = if which::which("apt-get").is_ok() {
            Cmd::new("apt-get").args(["install", "-y", "qemu-user-static", "binfmt-support"])
        } else if which::which("dnf").is_ok() {
            Cmd::new("dnf").args(["install", "-y", "qemu-user-static"])
        } else if which::which("pacman").is_ok() {
            Cmd::new("pacman").args(["-S", "--noconfirm", "qemu-user-static"])
        } else {
            return Err(ProvisionError::DependencyInstall(
                "no supported package manager found (apt-get, dnf, pacman); \
                 install qemu-user-static manually"
                    .to_string(),
            ));
        };

        let result = attempt
            .allow_fail()
            .run()
            .map_err(|e| ProvisionError::DependencyInstall(e.to_string()))?;

        if !result.success() {
            return Err(ProvisionError::DependencyInstall(format!(
                "package installation failed (exit code {}): {}",
                result.code(),
                result.stderr_trimmed()
            )));
        }
        Ok(())
    }

    fn binfmt_registered(&self, qarch: &str) -> bool {
        let entry = PathBuf::from("/proc/sys/fs/binfmt_misc").join(format!("qemu-{qarch}"));
        match fs::read_to_string(entry) {
            Ok(content) => binfmt_enabled(&content),
            Err(_) => false,
        }
    }

    fn enable_binfmt(&self, qarch: &str) -> Result<(), ProvisionError> {
        let attempt = if which::which("update-binfmts").is_ok() {
            Cmd::new("update-binfmts").args(["--enable", &format!("qemu-{qarch}")])
        } else if which::which("systemctl").is_ok() {
            Cmd::new("systemctl").args(["restart", "systemd-binfmt.service"])
        } else {
            return Err(ProvisionError::DependencyInstall(
                "neither update-binfmts nor systemctl available to enable binfmt_misc".to_string(),
            ));
        };

        let result = attempt
            .allow_fail()
            .run()
            .map_err(|e| ProvisionError::DependencyInstall(e.to_string()))?;

        if !result.success() {
            return Err(ProvisionError::DependencyInstall(format!(
                "enabling binfmt support failed (exit code {}): {}",
                result.code(),
                result.stderr_trimmed()
            )));
        }
        Ok(())
    }
}

/// Candidate binary names for a qemu architecture, most specific first.
pub fn emulator_names(qarch: &str) -> [String; 2] {
    [format!("qemu-{qarch}-static"), format!("qemu-{qarch}")]
}

/// A binfmt_misc entry file starts with `enabled` or `disabled`.
pub fn binfmt_enabled(entry_content: &str) -> bool {
    entry_content.lines().next() == Some("enabled")
}

/// Copy the emulator into `<chroot>/usr/bin` so it remains reachable after
/// the chroot transition.
pub fn copy_into_root(emulator: &Path, chroot_dir: &Path) -> Result<PathBuf, ProvisionError> {
    let bin_dir = chroot_dir.join("usr/bin");
    let file_name = emulator.file_name().ok_or_else(|| {
        ProvisionError::DependencyInstall(format!(
            "emulator path has no file name: {}",
            emulator.display()
        ))
    })?;
    let dest = bin_dir.join(file_name);

    let io_err = |e: std::io::Error| {
        ProvisionError::DependencyInstall(format!(
            "failed to copy emulator into {}: {e}",
            dest.display()
        ))
    };

    fs::create_dir_all(&bin_dir).map_err(io_err)?;
    fs::copy(emulator, &dest).map_err(io_err)?;
    fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).map_err(io_err)?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A host with a fixed emulator location and scripted install outcome.
    struct ScriptedHost {
        emulator: Option<PathBuf>,
        install_ok: bool,
        binfmt_enabled: bool,
    }

    impl EmulatorHost for ScriptedHost {
        fn find_emulator(&self, _qarch: &str) -> Option<PathBuf> {
            self.emulator.clone()
        }

        fn install_emulator(&self) -> Result<(), ProvisionError> {
            if self.install_ok {
                Ok(())
            } else {
                Err(ProvisionError::DependencyInstall(
                    "no supported package manager found".to_string(),
                ))
            }
        }

        fn binfmt_registered(&self, _qarch: &str) -> bool {
            self.binfmt_enabled
        }

        fn enable_binfmt(&self, _qarch: &str) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    #[test]
    fn test_emulator_names_prefer_static() {
        assert_eq!(
            emulator_names("arm"),
            ["qemu-arm-static".to_string(), "qemu-arm".to_string()]
        );
    }

    #[test]
    fn test_binfmt_enabled_parsing() {
        assert!(binfmt_enabled("enabled\ninterpreter /usr/bin/qemu-arm-static\n"));
        assert!(!binfmt_enabled("disabled\ninterpreter /usr/bin/qemu-arm-static\n"));
        assert!(!binfmt_enabled(""));
    }

    #[test]
    fn test_ensure_fails_when_emulator_cannot_be_installed() {
        let temp = TempDir::new().unwrap();
        let host = ScriptedHost {
            emulator: None,
            install_ok: false,
            binfmt_enabled: false,
        };

        let err = ensure_with("armhf", temp.path(), &host).unwrap_err();

        assert!(matches!(err, ProvisionError::DependencyInstall(_)));
        // Nothing was copied into the chroot.
        assert!(!temp.path().join("usr/bin").exists());
    }

    #[test]
    fn test_ensure_fails_when_install_leaves_emulator_missing() {
        let temp = TempDir::new().unwrap();
        let host = ScriptedHost {
            emulator: None,
            install_ok: true,
            binfmt_enabled: false,
        };

        let err = ensure_with("armhf", temp.path(), &host).unwrap_err();
        assert!(matches!(err, ProvisionError::DependencyInstall(_)));
    }

    #[test]
    fn test_ensure_copies_emulator_into_root() {
        let temp = TempDir::new().unwrap();
        let emulator = temp.path().join("qemu-arm-static");
        fs::write(&emulator, "binary").unwrap();

        let chroot = temp.path().join("chroot");
        let host = ScriptedHost {
            emulator: Some(emulator),
            install_ok: true,
            binfmt_enabled: true,
        };

        let dest = ensure_with("armhf", &chroot, &host).unwrap();
        assert_eq!(dest, chroot.join("usr/bin/qemu-arm-static"));
    }

    #[test]
    fn test_copy_into_root_installs_executable() {
        let temp = TempDir::new().unwrap();
        let emulator = temp.path().join("qemu-arm-static");
        fs::write(&emulator, "#!/bin/sh\n").unwrap();

        let chroot = temp.path().join("chroot");
        let dest = copy_into_root(&emulator, &chroot).unwrap();

        assert_eq!(dest, chroot.join("usr/bin/qemu-arm-static"));
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_copy_into_root_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let emulator = temp.path().join("qemu-aarch64-static");
        fs::write(&emulator, "binary").unwrap();

        let chroot = temp.path().join("chroot");
        copy_into_root(&emulator, &chroot).unwrap();
        let dest = copy_into_root(&emulator, &chroot).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"binary");
    }
}
