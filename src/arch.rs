//! CPU architecture normalization and emulation decisions.
//!
//! Alpine, Debian, and uname all spell architectures differently. Everything
//! downstream (repository paths, apk's `--arch` flag, the qemu binary name)
//! works on the canonical Alpine spelling produced by [`normalize`].

/// Collapse known architecture aliases to the canonical Alpine identifier.
///
/// Total and deterministic: unrecognized input passes through unchanged so
/// new architectures degrade gracefully instead of erroring. Idempotent,
/// since every canonical form maps to itself.
pub fn normalize(raw: &str) -> String {
    match raw {
        "amd64" | "x86_64" => "x86_64",
        "x86" | "i386" | "i486" | "i586" | "i686" => "x86",
        "arm" | "armv6" | "armv6l" | "armv7" | "armv7l" | "armhf" => "armhf",
        "arm64" | "aarch64" => "aarch64",
        "ppc64el" | "ppc64le" => "ppc64le",
        other => other,
    }
    .to_string()
}

/// Canonical architecture of the machine this process runs on.
pub fn host_arch() -> String {
    normalize(std::env::consts::ARCH)
}

/// Emulation is needed exactly when the normalized target differs from the
/// normalized host.
pub fn needs_emulation(host: &str, target: &str) -> bool {
    normalize(host) != normalize(target)
}

/// Suffix of the qemu-user binary that emulates `canonical`
/// (e.g. `armhf` runs under `qemu-arm`).
pub fn qemu_arch(canonical: &str) -> String {
    match canonical {
        "x86" => "i386",
        "armhf" => "arm",
        other => other,
    }
    .to_string()
}
