//! alproot - Alpine chroot provisioner CLI.
//!
//! Every flag has an environment-variable equivalent (shown per flag); the
//! flag wins when both are given. A `.env` file in the current directory is
//! loaded first and never overrides real environment variables.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use alproot::arch;
use alproot::config::{self, Config};
use alproot::{destroy, provision};

#[derive(Parser)]
#[command(name = "alproot", version)]
#[command(about = "Provision a minimal Alpine Linux chroot with optional qemu-user emulation")]
#[command(after_help = "\
QUICK START:
  alproot                       Provision /alpine for the host architecture
  alproot -a armhf -d /alpine   Provision an emulated armhf root
  /alpine/enter-chroot          Enter it (default: root login shell)
  alproot --destroy -d /alpine  Unmount and remove it

Must run as root.")]
struct Cli {
    /// Target architecture, e.g. x86_64, armhf, aarch64 [env: ARCH]
    #[arg(short, long)]
    arch: Option<String>,

    /// Alpine branch, e.g. latest-stable, v3.20, edge [env: ALPINE_BRANCH]
    #[arg(short, long)]
    branch: Option<String>,

    /// Directory that becomes the chroot root [env: CHROOT_DIR]
    #[arg(short = 'd', long)]
    chroot_dir: Option<PathBuf>,

    /// Host directory bound at the same path inside the chroot
    /// [env: BIND_DIR, default: current directory]
    #[arg(short = 'i', long)]
    bind_dir: Option<PathBuf>,

    /// Environment variable name pattern forwarded into the chroot,
    /// as a POSIX extended regex (matched by grep -E at entry time);
    /// repeatable [env: CHROOT_KEEP_VARS]
    #[arg(short = 'k', long = "keep-var")]
    keep_vars: Vec<String>,

    /// Package mirror base URI [env: ALPINE_MIRROR]
    #[arg(short, long)]
    mirror: Option<String>,

    /// Package to install on first run; repeatable [env: ALPINE_PACKAGES]
    #[arg(short, long = "package")]
    packages: Vec<String>,

    /// Extra repository URI appended after main and community; repeatable
    /// [env: EXTRA_REPOS]
    #[arg(short = 'r', long = "repo")]
    extra_repos: Vec<String>,

    /// Scratch directory for downloads [env: TEMP_DIR]
    #[arg(short, long)]
    temp_dir: Option<PathBuf>,

    /// Unmount and remove the chroot instead of provisioning it
    #[arg(long)]
    destroy: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    apply_overrides(&mut config, &cli)?;

    if cli.destroy {
        destroy::destroy(&config)
    } else {
        provision::run(&config)
    }
}

/// CLI flags take precedence over environment-derived configuration.
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(arch) = &cli.arch {
        config.arch = arch::normalize(arch);
    }
    if let Some(branch) = &cli.branch {
        config.branch = branch.clone();
    }
    if let Some(dir) = &cli.chroot_dir {
        config.chroot_dir = dir.clone();
    }
    if let Some(dir) = &cli.bind_dir {
        config.bind_dir = config::resolve_bind_dir(dir)?;
    }
    if !cli.keep_vars.is_empty() {
        config.keep_vars = cli.keep_vars.clone();
    }
    if let Some(mirror) = &cli.mirror {
        config.mirror = mirror.clone();
    }
    if !cli.packages.is_empty() {
        config.packages = cli.packages.clone();
    }
    if !cli.extra_repos.is_empty() {
        config.extra_repos = cli.extra_repos.clone();
    }
    if let Some(dir) = &cli.temp_dir {
        config.temp_dir = dir.clone();
    }
    Ok(())
}
