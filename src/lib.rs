//! alproot - provision a minimal Alpine Linux chroot.
//!
//! Creates a disposable, reproducible Alpine root filesystem at a chosen
//! directory, optionally wired for foreign-CPU emulation (qemu-user +
//! binfmt_misc), and installs an `enter-chroot` script that re-enters the
//! environment with a filtered host environment.
//!
//! Pipeline (strictly sequential, see [`provision::run`]):
//! verified fetch of apk-tools and signing keys → architecture resolution →
//! conditional emulation setup → root bootstrap → bind mounts → entry-script
//! generation → first-run package installation and user creation.
//!
//! Concurrency assumptions: at most one provisioning run per root directory
//! (mount and apk database operations are not concurrency-safe; use an
//! external lock if needed). Invocations of the generated entry script are
//! independent of each other and may run concurrently only insofar as the
//! host's `sudo` and `chroot` primitives are safe for concurrent use.

pub mod arch;
pub mod bootstrap;
pub mod config;
pub mod destroy;
pub mod enter;
pub mod errors;
pub mod fetch;
pub mod mounts;
pub mod process;
pub mod provision;
pub mod qemu;
