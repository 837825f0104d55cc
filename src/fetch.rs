//! Trust-verified artifact download.
//!
//! Everything that crosses the network (the static apk binary, the Alpine
//! signing keys) goes through [`fetch`]: the bytes are downloaded to a
//! temporary file, hashed with SHA-256, and only renamed into place once the
//! digest matches the pinned value. A destination path therefore either
//! holds a verified artifact or nothing at all.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::ProvisionError;
use crate::process::Cmd;

/// Connection timeout for downloads, in seconds.
pub const CONNECT_TIMEOUT_SECS: u32 = 10;

/// Download `url` into `dest_dir` and verify it against `expected_sha256`.
///
/// Returns the path of the verified file (named after the last URL segment).
/// A stale same-named file at the destination is removed before the download
/// starts, so whatever the outcome the destination holds either a freshly
/// verified artifact or nothing.
pub fn fetch(url: &str, expected_sha256: &str, dest_dir: &Path) -> Result<PathBuf, ProvisionError> {
    let name = url.rsplit('/').next().filter(|s| !s.is_empty()).ok_or_else(|| {
        ProvisionError::Transport {
            url: url.to_string(),
            reason: "URL has no file name component".to_string(),
        }
    })?;

    let dest = dest_dir.join(name);
    let part = dest_dir.join(format!(".{name}.part"));

    // A stale same-named file must not outlive a failed download either, so
    // it is removed up front rather than overwritten at the end.
    if dest.exists() {
        fs::remove_file(&dest).map_err(|e| ProvisionError::Transport {
            url: url.to_string(),
            reason: format!("failed to remove stale destination: {e}"),
        })?;
    }

    let download = Cmd::new("curl")
        .arg("--connect-timeout")
        .arg(CONNECT_TIMEOUT_SECS.to_string())
        .args(["-fsSL", "-o"])
        .arg_path(&part)
        .arg(url)
        .allow_fail()
        .run()
        .map_err(|e| ProvisionError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    if !download.success() {
        let _ = fs::remove_file(&part);
        return Err(ProvisionError::Transport {
            url: url.to_string(),
            reason: format!(
                "curl exited with code {}: {}",
                download.code(),
                download.stderr_trimmed()
            ),
        });
    }

    let actual = sha256_hex(&part).map_err(|e| ProvisionError::Transport {
        url: url.to_string(),
        reason: format!("failed to hash downloaded file: {e}"),
    })?;

    let expected = expected_sha256.to_ascii_lowercase();
    if actual != expected {
        let _ = fs::remove_file(&part);
        return Err(ProvisionError::Integrity {
            url: url.to_string(),
            expected,
            actual,
        });
    }

    fs::rename(&part, &dest).map_err(|e| ProvisionError::Transport {
        url: url.to_string(),
        reason: format!("failed to move verified file into place: {e}"),
    })?;

    Ok(dest)
}

/// SHA-256 digest of a file, as a lowercase hex string.
pub fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}
