//! Shared test utilities for alproot tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test environment with a temporary chroot directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Mock chroot root directory
    pub chroot: PathBuf,
    /// Scratch directory standing in for TEMP_DIR
    pub temp: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let chroot = base.join("chroot");
        let temp = base.join("tmp");
        fs::create_dir_all(&chroot).expect("Failed to create chroot dir");
        fs::create_dir_all(&temp).expect("Failed to create temp dir");

        Self {
            _temp_dir: temp_dir,
            chroot,
            temp,
        }
    }
}

/// Write a file and return a `file://` URL pointing at it, for exercising
/// the fetcher without a network.
pub fn artifact_url(dir: &Path, name: &str, content: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write artifact");
    format!("file://{}", path.display())
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {e}", path.display()));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}
