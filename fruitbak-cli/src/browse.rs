//! `ls`, `cat` and `tar`: read-only traversal of a finalized backup.
//!
//! Each level of `ls` narrows as more arguments are given, mirroring
//! the on-disk layout of §6: hosts, then a host's backups, then a
//! backup's shares, then a share's directory tree.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context, Error};
use fbk_datastore::{Dentry, DentryKind, ShareReader};
use fbk_tools::mangle::{mangle, unmangle};
use fruitbak::{backup, Root};

fn share_dir(root: &Root, host: &str, backup_num: u32, share: &str) -> Result<std::path::PathBuf, Error> {
    let host_name = fbk_api_types::HostName::new(host)?;
    let dir = root.host_dir(&host_name).join(backup_num.to_string()).join("share").join(mangle(share));
    if !dir.exists() {
        bail!("no share {share:?} in backup {backup_num} of host {host:?}");
    }
    Ok(dir)
}

fn list_shares(host_dir: &Path, backup_num: u32) -> Result<Vec<String>, Error> {
    let dir = host_dir.join(backup_num.to_string()).join("share");
    let mut names = Vec::new();
    if dir.exists() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(unmangle(name));
            }
        }
    }
    names.sort();
    Ok(names)
}

fn print_dentry(dentry: &Dentry) {
    let kind = dentry.kind().ok();
    let tag = match kind {
        Some(DentryKind::Dir) => "d",
        Some(DentryKind::File { .. }) => "-",
        Some(DentryKind::Symlink { .. }) => "l",
        Some(DentryKind::Hardlink { .. }) => "h",
        Some(DentryKind::Device { .. }) => "b",
        Some(DentryKind::Fifo) => "p",
        Some(DentryKind::Socket) => "s",
        None => "?",
    };
    println!("{tag} {:>12} {}", dentry.size, dentry.name);
}

pub fn ls(root: &Root, host: Option<&str>, backup_num: Option<u32>, share: Option<&str>, path: Option<&str>) -> Result<(), Error> {
    let Some(host) = host else {
        for (name, _) in root.host_dirs()? {
            println!("{name}");
        }
        return Ok(());
    };
    let host_name = fbk_api_types::HostName::new(host)?;
    let host_dir = root.host_dir(&host_name);

    let Some(backup_num) = backup_num else {
        for record in backup::backup_records(&host_dir)? {
            println!("{:>6}  {}  {}", record.number, record.start_time, record.status.as_str());
        }
        return Ok(());
    };

    let Some(share) = share else {
        for name in list_shares(&host_dir, backup_num)? {
            println!("{name}");
        }
        return Ok(());
    };

    let dir = share_dir(root, host, backup_num, share)?;
    let reader = ShareReader::open(dir);
    for dentry in reader.ls(path.unwrap_or(""))? {
        print_dentry(&dentry);
    }
    Ok(())
}

pub fn cat(root: &Root, host: &str, backup_num: u32, share: &str, path: &str) -> Result<(), Error> {
    let dir = share_dir(root, host, backup_num, share)?;
    let reader = ShareReader::open(dir);
    let dentry = reader
        .get_entry(path)?
        .ok_or_else(|| anyhow::anyhow!("no such entry {path:?}"))?;
    let digests = match dentry.kind()? {
        DentryKind::File { digests } => digests,
        other => bail!("{path:?} is not a regular file ({other:?})"),
    };
    let reader = root.pool.reader(digests, dentry.size);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut offset = 0u64;
    const CHUNK: u64 = 1 << 20;
    while offset < dentry.size {
        let data = reader.pread(offset, CHUNK)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        offset += data.len() as u64;
    }
    Ok(())
}

/// Streams `path` and its subtree as a tar archive to stdout. Hardlinks
/// are emitted as GNU hardlink entries pointing at the first-seen name
/// recorded in the share index (§3's Dentry invariant), not resolved
/// to a second copy of the content.
pub fn tar(root: &Root, host: &str, backup_num: u32, share: &str, path: &str) -> Result<(), Error> {
    let dir = share_dir(root, host, backup_num, share)?;
    let reader = ShareReader::open(dir);
    let stdout = io::stdout();
    let mut builder = ::tar::Builder::new(stdout.lock());

    for dentry in reader.find(path)? {
        let kind = dentry.kind()?;
        let mut header = ::tar::Header::new_gnu();
        header.set_mode(dentry.mode & 0o7777);
        header.set_uid(dentry.uid as u64);
        header.set_gid(dentry.gid as u64);
        header.set_mtime(dentry.mtime_ns / 1_000_000_000);

        let name = if dentry.name.is_empty() { "." } else { dentry.name.as_str() };
        match kind {
            DentryKind::Dir => {
                header.set_entry_type(::tar::EntryType::Directory);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, name, io::empty())?;
            }
            DentryKind::File { digests } => {
                header.set_entry_type(::tar::EntryType::Regular);
                header.set_size(dentry.size);
                header.set_cksum();
                let pool_reader = root.pool.reader(digests, dentry.size);
                let data = pool_reader
                    .pread(0, dentry.size)
                    .with_context(|| format!("reading {name} for tar"))?;
                builder.append_data(&mut header, name, data.as_slice())?;
            }
            DentryKind::Symlink { target } => {
                header.set_entry_type(::tar::EntryType::Symlink);
                header.set_size(0);
                let target = String::from_utf8_lossy(&target);
                header.set_link_name(target.as_ref())?;
                header.set_cksum();
                builder.append_data(&mut header, name, io::empty())?;
            }
            DentryKind::Hardlink { target_name } => {
                header.set_entry_type(::tar::EntryType::Link);
                header.set_size(0);
                header.set_link_name(&target_name)?;
                header.set_cksum();
                builder.append_data(&mut header, name, io::empty())?;
            }
            DentryKind::Device { major, minor } => {
                let is_char = dentry.file_type() == libc::S_IFCHR;
                header.set_entry_type(if is_char { ::tar::EntryType::Char } else { ::tar::EntryType::Block });
                header.set_device_major(major)?;
                header.set_device_minor(minor)?;
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, name, io::empty())?;
            }
            DentryKind::Fifo => {
                header.set_entry_type(::tar::EntryType::Fifo);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, name, io::empty())?;
            }
            DentryKind::Socket => {
                log::warn!("skipping socket {name} (no tar representation)");
            }
        }
    }
    builder.finish()?;
    Ok(())
}
