//! Small conveniences layered on top of `proxmox_sys::fs`.
//!
//! `create_dir`, `create_path`, `CreateOptions` and `replace_file` already
//! do the heavy lifting (mode/owner handling, atomic temp-file-then-rename
//! writes); this module only adds the fsync-level-aware JSON sidecar
//! helpers that every `info.json` writer in the pool and share layers needs.

use std::path::Path;

use anyhow::{Context, Error};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::close;
use serde::{de::DeserializeOwned, Serialize};

use fbk_api_types::FsyncLevel;
use proxmox_sys::fs::{replace_file, CreateOptions};

/// Serialize `value` as JSON and write it to `path` with an atomic
/// rename, honoring the requested durability level.
///
/// `File` fsyncs the replaced file (and, via `replace_file`'s own
/// behavior, renames into place only after the write is flushed);
/// `Filesystem` additionally syncs the directory the file lives in so the
/// rename itself is durable. `None` skips both.
pub fn write_json_sidecar<T: Serialize>(
    path: &Path,
    value: &T,
    fsync: FsyncLevel,
) -> Result<(), Error> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {path:?}"))?;
    bytes.push(b'\n');

    replace_file(path, &bytes, CreateOptions::new(), fsync != FsyncLevel::None)
        .with_context(|| format!("failed to write {path:?}"))?;

    if fsync == FsyncLevel::Filesystem {
        sync_parent_dir(path)?;
    }

    Ok(())
}

pub fn read_json_sidecar<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    serde_json::from_slice(&data).with_context(|| format!("failed to parse {path:?}"))
}

/// fsync the directory containing `path`, so a preceding rename into that
/// directory is durable across a crash.
pub fn sync_parent_dir(path: &Path) -> Result<(), Error> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let fd = open(dir, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
        .with_context(|| format!("failed to open directory {dir:?} for fsync"))?;
    let result = nix::unistd::fsync(fd).with_context(|| format!("fsync of {dir:?} failed"));
    let _ = close(fd);
    result
}
