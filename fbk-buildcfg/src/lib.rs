//! Compile-time constants and path macros for the default on-disk layout.
//!
//! None of this is required to use the library — every entry point in
//! `fruitbak` and `fbk-datastore` takes an explicit `rootdir` — but a thin
//! CLI benefits from having the conventional system-wide defaults in one
//! place instead of scattered string literals.

pub const FRUITBAK_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);

/// Default configuration directory consulted by the CLI when `--config` is
/// not given.
pub const CONFIGDIR: &str = "/etc/fruitbak";

/// Default root of the backup pool/host tree, per §6.
pub const DEFAULT_ROOTDIR: &str = "/var/lib/fruitbak";

/// Prepend the default configuration directory to a file name.
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/fruitbak", $subdir)
    };
}
