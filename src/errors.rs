//! Error taxonomy for the provisioning pipeline.
//!
//! Every fatal condition maps to exactly one variant so failures are
//! attributable to a pipeline stage from the message alone. All variants
//! abort the run; there is no partial-success mode.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Not running with the elevated rights the mount/chroot operations need.
    /// Checked before any side effect is performed.
    #[error("privilege: must run as root (euid {euid})")]
    Privilege { euid: u32 },

    /// A network fetch failed before any trust decision was made.
    #[error("transport: failed to download {url}: {reason}")]
    Transport { url: String, reason: String },

    /// A fetched artifact did not match its pinned digest. The artifact is
    /// removed and never used.
    #[error("integrity: digest mismatch for {url}\n  expected: {expected}\n  actual:   {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    /// Host-level installation of the emulator or binfmt support failed.
    #[error("dependency-install: {0}")]
    DependencyInstall(String),

    /// apk failed to initialize the root. No partial-root cleanup is
    /// attempted; the caller discards the directory and retries.
    #[error("bootstrap: {0}")]
    Bootstrap(String),

    /// A mount or unmount operation failed. Mount operations are idempotent
    /// toward already-correct state, so a re-run after fixing the cause is
    /// safe.
    #[error("mount: {op} {path}: {reason}", path = .target.display())]
    Mount {
        op: &'static str,
        target: PathBuf,
        reason: String,
    },
}
