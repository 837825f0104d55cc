//! Entry script generation.
//!
//! Provisioning installs a self-contained `enter-chroot` script at the top
//! of the chroot. The *set* of environment variable names allowed to cross
//! into the chroot is a provisioning-time policy and gets baked into the
//! script as a single alternation; the *values* are captured fresh on every
//! invocation, so later changes to the host environment are respected.
//!
//! Repeated invocations are independent (fresh snapshot, fresh working
//! directory capture). Concurrent invocations are safe only to the extent
//! the host's sudo and chroot are; that is a caller-facing assumption.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Name of the generated script inside the chroot.
pub const SCRIPT_NAME: &str = "enter-chroot";

/// Join the filter patterns into one alternation, validating each as an
/// extended regular expression.
///
/// The alternation is matched against whole variable names (`grep -Ex` in
/// the script), so patterns need no anchors of their own. Validation happens
/// here with the `regex` crate but the actual matching is done by the host's
/// `grep -E` at entry time, so patterns are restricted to the syntax the two
/// dialects share: no `(?...)` groups and no backslash character classes
/// like `\d` or `\w` (POSIX bracket classes such as `[[:digit:]]` work in
/// both).
pub fn filter_alternation(patterns: &[String]) -> Result<String> {
    if patterns.is_empty() {
        bail!("Environment filter needs at least one pattern");
    }

    for pattern in patterns {
        // The alternation is embedded in a single-quoted shell string.
        if pattern.contains('\'') {
            bail!("Invalid filter pattern {pattern:?}: single quotes are not allowed");
        }
        if pattern.contains("(?") {
            bail!("Invalid filter pattern {pattern:?}: `(?` groups are not portable to grep -E");
        }
        if let Some(escape) = nonportable_escape(pattern) {
            bail!(
                "Invalid filter pattern {pattern:?}: `\\{escape}` is not portable to grep -E; \
                 use a POSIX bracket class like [[:digit:]] instead"
            );
        }
        Regex::new(&format!("^(?:{pattern})$"))
            .with_context(|| format!("Invalid filter pattern {pattern:?}"))?;
    }

    Ok(patterns.join("|"))
}

/// First backslash escape in `pattern` that ERE does not guarantee to mean
/// the same thing as the validating engine. Escaped punctuation (`\.`,
/// `\\`, `\$`) is portable; a backslash before an alphanumeric character
/// (`\d`, `\w`, `\1`) is not.
fn nonportable_escape(pattern: &str) -> Option<char> {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next.is_ascii_alphanumeric() => return Some(next),
                _ => {}
            }
        }
    }
    None
}

/// Whether a variable name passes the filter. Mirrors the script's
/// `grep -Eqx` semantics: the name matches iff at least one pattern matches
/// it in full. Used by the orchestrator-side tests.
pub fn name_matches(patterns: &[String], name: &str) -> Result<bool> {
    let alternation = filter_alternation(patterns)?;
    let re = Regex::new(&format!("^(?:{alternation})$"))?;
    Ok(re.is_match(name))
}

/// Produce the entry script text with the filter patterns baked in.
pub fn generate(patterns: &[String]) -> Result<String> {
    let alternation = filter_alternation(patterns)?;

    Ok(format!(
        r#"#!/bin/sh
# Enter the Alpine chroot at the directory containing this script.
#
# Usage: enter-chroot [-u USER] [COMMAND...]
#
# Runs COMMAND (default: a shell) as USER (default: root) inside the chroot
# through a simulated login. Host environment variables cross over only if
# their name matches the filter baked in below; values are captured fresh on
# every invocation.
set -e

ENV_FILTER_REGEX='{alternation}'

user='root'
if [ $# -ge 2 ] && [ "$1" = '-u' ]; then
	user="$2"; shift 2
fi

oldpwd="$(pwd)"

_sudo=''
[ "$(id -u)" -eq 0 ] || _sudo='sudo'

# Snapshot the environment, keeping only variables whose *name* matches the
# filter. Matching is by name, never by value.
tmpfile="$(mktemp)"
chmod 644 "$tmpfile"
export -p | while IFS= read -r line; do
	case "$line" in
		export\ *=*) ;;
		*) continue ;;
	esac
	name="${{line#export }}"
	name="${{name%%=*}}"
	if printf '%s\n' "$name" | grep -Eqx "$ENV_FILTER_REGEX"; then
		printf '%s\n' "$line" >> "$tmpfile"
	fi
done

cd "$(dirname "$0")"
$_sudo mv "$tmpfile" env.sh

# Clean-environment transition: nothing from the host survives except the
# filtered snapshot, sourced at shell start after the login profile. The
# captured working directory is restored when it still resolves inside the
# new root.
exec $_sudo chroot . /usr/bin/env -i su -l "$user" \
	sh -c ". /etc/profile 2>/dev/null
	       . /env.sh 2>/dev/null
	       cd \"{oldpwd}\" 2>/dev/null
	       \"\$@\"" -- "${{@:-sh}}"
"#,
        alternation = alternation,
        oldpwd = "$oldpwd",
    ))
}

/// Install the script at the chroot's top level, executable.
pub fn write_script(chroot_dir: &Path, text: &str) -> Result<PathBuf> {
    let path = chroot_dir.join(SCRIPT_NAME);
    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to mark {} executable", path.display()))?;
    Ok(path)
}
