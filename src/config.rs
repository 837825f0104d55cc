//! Configuration management for alproot.
//!
//! Every CLI flag has an environment-variable equivalent; values are read
//! here from the environment (after `main` has loaded any `.env` file) and
//! CLI flags override them afterwards. Defaults follow the Alpine ecosystem
//! conventions.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::arch;

/// Default package mirror.
pub const DEFAULT_MIRROR: &str = "https://dl-cdn.alpinelinux.org/alpine";

/// Default distribution branch.
pub const DEFAULT_BRANCH: &str = "latest-stable";

/// Default package set installed on first entry.
pub const DEFAULT_PACKAGES: &str = "build-base ca-certificates ssl_client";

/// Default host environment variable name patterns forwarded into the
/// chroot (extended regular expressions, matched against whole names).
pub const DEFAULT_KEEP_VARS: &str = "ARCH CI QEMU_EMULATOR TRAVIS_.*";

/// Pinned apk-tools-static release used to bootstrap the root.
pub const APK_TOOLS_VERSION: &str = "2.14.4";

/// Pinned SHA-256 digests of `apk.static` per target architecture.
///
/// Override with `APK_TOOLS_URI`/`APK_TOOLS_SHA256` when bootstrapping an
/// architecture not listed here or a newer release.
pub const APK_TOOLS_SHA256: &[(&str, &str)] = &[
    (
        "x86_64",
        "7851d92bb0c3d61e1e2b0faac238acbbfc0fd9ff951e9c17116d2902ca3e49c2",
    ),
    (
        "x86",
        "34d5637b4d7fae9c0146b8dfd51816e8a00b5ba7cd6293aeb75f3aeca920ea53",
    ),
    (
        "aarch64",
        "f49b188eb8eb0ed0dbf50940f1e4ecb5fa0b4ae00e211b0bcdbf46d6e0aab4d0",
    ),
    (
        "armhf",
        "16a5e269c548e5deb386e01e2b7f0d1e1fd38e8ee48bbed5e5494a135b14e308",
    ),
    (
        "ppc64le",
        "9c22f9cb9144ae2b9be4c3c60f5b6b2a89b3f9d7e14a49cd1e1f3ae8382ba0ab",
    ),
    (
        "riscv64",
        "c936cf2cd5a8108de11d1d0bf86c9e6e83b0e3aa2b4c7de9bb12e5a7d418bb82",
    ),
    (
        "s390x",
        "2d5e6e2bb3ba3e1e6e6dd9b4e8cd4b1b2ccf0f94fb7d1a0a77310ee1a2fb8f0c",
    ),
];

/// Base URI for the Alpine signing keys.
pub const APK_KEYS_URI: &str = "https://alpinelinux.org/keys";

/// Alpine package signing keys installed into `etc/apk/keys`, with pinned
/// SHA-256 digests. One key per release architecture family.
pub const APK_KEYS_SHA256: &[(&str, &str)] = &[
    (
        "alpine-devel@lists.alpinelinux.org-4a6a0840.rsa.pub",
        "ebf31683b56410ecc4c00acd9f6e2839e237a3b62b5ae7ef686705c7ba0396a9",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-5243ef4b.rsa.pub",
        "1bb2a846c0ea4ca9d0e7862f970863857fc33c32f5506098c636a62a726a847b",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-524d27bb.rsa.pub",
        "12f899e55a7691225603d6fb3324940fc51cd7f133e7ead788663c2b7eecb00c",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-5261cecb.rsa.pub",
        "73867d92083f2f8ab899a26ccda7ef63dfaa0032a938620eda605558958a8041",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-58199dcc.rsa.pub",
        "9a4cd858d9710963848e6d5f555325dc199d1c952b01cf6e64da2c15deedbd97",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-58cbb476.rsa.pub",
        "6a3427ccea9646e8d30a1eb8849f19b6c2a30e13e3e1674b3db88c599d3ca6ab",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-58e4f17d.rsa.pub",
        "752a9ecf6a7d41a3dce58667acdf783b09bed492dd2b1055e2abd6f2a6d48cb7",
    ),
    (
        "alpine-devel@lists.alpinelinux.org-60ac2099.rsa.pub",
        "e8f8eb0a173b723b7d1a5b54d4082017b17c53c33064d44d14b2a961b7400e48",
    ),
];

/// Resolved provisioning configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target architecture, canonical form (default: host architecture).
    pub arch: String,
    /// Distribution branch (e.g. `latest-stable`, `v3.20`, `edge`).
    pub branch: String,
    /// Package mirror base URI.
    pub mirror: String,
    /// Packages installed by the first-run step.
    pub packages: Vec<String>,
    /// Directory that becomes the chroot root.
    pub chroot_dir: PathBuf,
    /// Host directory bound at the same path inside the chroot.
    pub bind_dir: PathBuf,
    /// Environment variable name patterns forwarded into the chroot.
    pub keep_vars: Vec<String>,
    /// Extra repository URIs appended after main and community.
    pub extra_repos: Vec<String>,
    /// Scratch directory for downloads.
    pub temp_dir: PathBuf,
    /// Override for the apk.static download URI.
    pub apk_tools_uri: Option<String>,
    /// Override for the apk.static digest.
    pub apk_tools_sha256: Option<String>,
}

impl Config {
    /// Load configuration from the environment, with defaults.
    ///
    /// `main` loads `.env` (via dotenvy) before calling this, so `.env`
    /// entries behave like environment variables; real environment variables
    /// are never overwritten by the `.env` file.
    pub fn load() -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let arch = arch::normalize(&env("ARCH").unwrap_or_else(arch::host_arch));
        let branch = env("ALPINE_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let mirror = env("ALPINE_MIRROR").unwrap_or_else(|| DEFAULT_MIRROR.to_string());
        let packages = split_list(&env("ALPINE_PACKAGES").unwrap_or_else(|| DEFAULT_PACKAGES.to_string()));
        let chroot_dir = PathBuf::from(env("CHROOT_DIR").unwrap_or_else(|| "/alpine".to_string()));
        let bind_dir = match env("BIND_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().context("Cannot determine current directory")?,
        };
        let bind_dir = resolve_bind_dir(&bind_dir)?;
        let keep_vars = split_list(&env("CHROOT_KEEP_VARS").unwrap_or_else(|| DEFAULT_KEEP_VARS.to_string()));
        let extra_repos = split_list(&env("EXTRA_REPOS").unwrap_or_default());
        let temp_dir = PathBuf::from(env("TEMP_DIR").unwrap_or_else(|| "/tmp/alproot".to_string()));

        Ok(Self {
            arch,
            branch,
            mirror,
            packages,
            chroot_dir,
            bind_dir,
            keep_vars,
            extra_repos,
            temp_dir,
            apk_tools_uri: env("APK_TOOLS_URI"),
            apk_tools_sha256: env("APK_TOOLS_SHA256"),
        })
    }

    /// Download URI for the pinned apk.static matching the target arch.
    pub fn apk_tools_uri(&self) -> String {
        self.apk_tools_uri.clone().unwrap_or_else(|| {
            format!(
                "https://gitlab.alpinelinux.org/api/v4/projects/5/packages/generic/v{}/{}/apk.static",
                APK_TOOLS_VERSION, self.arch
            )
        })
    }

    /// Pinned digest for apk.static, if one is known for the target arch.
    pub fn apk_tools_sha256(&self) -> Option<String> {
        self.apk_tools_sha256.clone().or_else(|| {
            APK_TOOLS_SHA256
                .iter()
                .find(|(a, _)| *a == self.arch)
                .map(|(_, d)| d.to_string())
        })
    }

    /// Print the resolved configuration.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  ARCH:            {}", self.arch);
        println!("  ALPINE_BRANCH:   {}", self.branch);
        println!("  ALPINE_MIRROR:   {}", self.mirror);
        println!("  ALPINE_PACKAGES: {}", self.packages.join(" "));
        println!("  CHROOT_DIR:      {}", self.chroot_dir.display());
        println!("  BIND_DIR:        {}", self.bind_dir.display());
        println!("  CHROOT_KEEP_VARS: {}", self.keep_vars.join(" "));
        if !self.extra_repos.is_empty() {
            println!("  EXTRA_REPOS:     {}", self.extra_repos.join(" "));
        }
        println!("  TEMP_DIR:        {}", self.temp_dir.display());
    }
}

/// Split a whitespace-separated environment value into items.
pub fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Resolve a user-supplied bind directory to a canonical absolute path.
///
/// The mount plan mirrors the bind directory at the same path inside the
/// chroot, so a relative or symlinked value would put the in-chroot target
/// somewhere other than the real host path. The directory must exist.
pub fn resolve_bind_dir(raw: &Path) -> Result<PathBuf> {
    fs::canonicalize(raw)
        .with_context(|| format!("Bind directory {} does not resolve", raw.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "ARCH",
            "ALPINE_BRANCH",
            "ALPINE_MIRROR",
            "ALPINE_PACKAGES",
            "CHROOT_DIR",
            "BIND_DIR",
            "CHROOT_KEEP_VARS",
            "EXTRA_REPOS",
            "TEMP_DIR",
            "APK_TOOLS_URI",
            "APK_TOOLS_SHA256",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a b  c"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
        assert_eq!(split_list("  one  "), vec!["one"]);
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = Config::load().unwrap();

        assert_eq!(config.branch, DEFAULT_BRANCH);
        assert_eq!(config.mirror, DEFAULT_MIRROR);
        assert_eq!(config.chroot_dir, PathBuf::from("/alpine"));
        assert_eq!(config.arch, arch::host_arch());
        assert_eq!(
            config.bind_dir,
            fs::canonicalize(std::env::current_dir().unwrap()).unwrap()
        );
        assert!(config.packages.contains(&"build-base".to_string()));
        assert!(config.keep_vars.contains(&"TRAVIS_.*".to_string()));
        assert!(config.extra_repos.is_empty());
    }

    #[test]
    #[serial]
    fn test_load_env_overrides_and_normalizes_arch() {
        clear_env();
        std::env::set_var("ARCH", "arm64");
        std::env::set_var("ALPINE_BRANCH", "v3.20");
        std::env::set_var("EXTRA_REPOS", "https://a/repo https://b/repo");

        let config = Config::load().unwrap();

        assert_eq!(config.arch, "aarch64");
        assert_eq!(config.branch, "v3.20");
        assert_eq!(config.extra_repos, vec!["https://a/repo", "https://b/repo"]);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_relative_bind_dir_becomes_absolute() {
        clear_env();
        let temp = tempfile::TempDir::new().unwrap();
        fs::create_dir(temp.path().join("project")).unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp.path()).unwrap();
        std::env::set_var("BIND_DIR", "project");

        let config = Config::load().unwrap();
        std::env::set_current_dir(&original).unwrap();
        clear_env();

        assert!(config.bind_dir.is_absolute());
        assert_eq!(
            config.bind_dir,
            fs::canonicalize(temp.path().join("project")).unwrap()
        );
    }

    #[test]
    fn test_resolve_bind_dir_requires_existing_directory() {
        assert!(resolve_bind_dir(Path::new("/nonexistent/bind/dir")).is_err());
    }

    #[test]
    #[serial]
    fn test_apk_tools_pin_lookup() {
        clear_env();
        std::env::set_var("ARCH", "aarch64");
        let config = Config::load().unwrap();

        assert!(config.apk_tools_uri().contains("/aarch64/apk.static"));
        assert!(config.apk_tools_sha256().is_some());

        std::env::set_var("ARCH", "mips64");
        let config = Config::load().unwrap();
        assert!(config.apk_tools_sha256().is_none());

        std::env::set_var("APK_TOOLS_SHA256", "abc123");
        let config = Config::load().unwrap();
        assert_eq!(config.apk_tools_sha256().as_deref(), Some("abc123"));

        clear_env();
    }
}
