//! Backup orchestrator (C8): selects a reference backup, decides
//! full-vs-incremental, drives each share through its transfer
//! provider, and finalizes `info.json`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use fbk_api_types::BackupStatus;
use fbk_client::{LocalWalker, RsyncTransfer, TransferContext, TransferProvider};
use fbk_config::{HostConfig, ShareConfig, TimeSpan};
use fbk_datastore::{Hashset, ShareInfo, ShareReader, ShareWriter};
use fbk_tools::fs::write_json_sidecar;
use fbk_tools::mangle::mangle;
use fbk_tools::process_lock::ProcessLocker;

use crate::expiry::BackupRecord;
use crate::root::{host_dir, Root};

/// `host/<hostname>/<backupnum>/info.json` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub level: u32,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    #[serde(rename = "endTime")]
    pub end_time: i64,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none", default)]
    pub reference: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub refhost: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed: Option<bool>,
}

impl BackupInfo {
    pub fn status(&self) -> BackupStatus {
        BackupStatus::from_failed_flag(self.failed.unwrap_or(false))
    }

    pub fn to_record(&self, number: u32) -> BackupRecord {
        BackupRecord {
            number,
            start_time: self.start_time,
            status: self.status(),
        }
    }
}

/// Flags that turn into the orchestrator's full/incremental decision
/// (the CLI parses `--full[=INTERVAL]`/`refbackup` into this; the
/// orchestrator itself never touches argv).
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub full: bool,
    pub full_after: Option<TimeSpan>,
    pub refbackup: Option<u32>,
}

/// Numeric subdirectories of a host directory, i.e. its existing backup
/// numbers, ascending.
pub fn list_backups(host_dir: &Path) -> Result<Vec<u32>, Error> {
    let mut numbers = Vec::new();
    if !host_dir.exists() {
        return Ok(numbers);
    }
    for entry in std::fs::read_dir(host_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(n) = name.parse::<u32>() {
                numbers.push(n);
            }
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

pub fn read_backup_info(host_dir: &Path, number: u32) -> Result<BackupInfo, Error> {
    fbk_tools::fs::read_json_sidecar(&host_dir.join(number.to_string()).join("info.json"))
}

pub fn backup_records(host_dir: &Path) -> Result<Vec<BackupRecord>, Error> {
    list_backups(host_dir)?
        .into_iter()
        .map(|n| read_backup_info(host_dir, n).map(|info| info.to_record(n)))
        .collect()
}

fn next_backup_number(existing: &[u32]) -> u32 {
    existing.iter().max().map_or(0, |n| n + 1)
}

/// Most recent completed backup (highest-numbered directory with a
/// finalized, non-failed `info.json`); backups still staged under `new/`
/// are never eligible.
fn select_reference(host_dir: &Path, existing: &[u32]) -> Option<(u32, BackupInfo)> {
    existing
        .iter()
        .rev()
        .find_map(|&n| read_backup_info(host_dir, n).ok().filter(|i| !i.failed.unwrap_or(false)).map(|i| (n, i)))
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Runs one host's backup to completion: acquires the per-host lock,
/// selects a reference, runs every configured share, finalizes
/// `info.json`, and renames `new` into its numeric slot.
pub fn run_host_backup(root: &Root, host: &HostConfig, opts: &BackupOptions) -> Result<BackupInfo, Error> {
    let _shared = ProcessLocker::try_shared(&root.locker).context("unable to acquire the Fruitbak-wide lock (is gc running?)")?;

    let host_dir = host_dir(&root.rootdir, &host.name);
    let new_dir = host_dir.join("new");
    let share_dir = new_dir.join("share");
    proxmox_sys::fs::create_path(
        &share_dir,
        Some(proxmox_sys::fs::CreateOptions::new()),
        Some(proxmox_sys::fs::CreateOptions::new()),
    )
    .with_context(|| format!("unable to create staging directory {new_dir:?}"))?;

    let host_locker = ProcessLocker::new(new_dir.join("lock"))?;
    let _host_guard = ProcessLocker::try_exclusive(&host_locker)
        .with_context(|| format!("a backup for host {} is already running", host.name))?;

    let existing = list_backups(&host_dir)?;
    let reference = match opts.refbackup {
        Some(n) => Some((n, read_backup_info(&host_dir, n)?)),
        None => select_reference(&host_dir, &existing),
    };

    let full = opts.full
        || reference.is_none()
        || opts
            .full_after
            .map(|interval| {
                reference
                    .as_ref()
                    .map_or(true, |(_, info)| now_secs() - info.start_time >= interval.as_secs() as i64)
            })
            .unwrap_or(false);

    let start_time = now_secs();
    let mut failed = false;

    for share in &host.shares {
        log::info!("host {}: share {:?} starting", host.name, share.name);
        match run_share(root, &host_dir, &share_dir, share, reference.as_ref().map(|(n, _)| *n), full) {
            Ok(()) => log::info!("host {}: share {:?} done", host.name, share.name),
            Err(err) => {
                log::warn!("host {}: share {:?} failed: {err:#}", host.name, share.name);
                failed = true;
            }
        }
    }

    let share_digest_lists = host
        .shares
        .iter()
        .filter_map(|share| {
            let reader = ShareReader::open(share_dir.join(mangle(&share.name)));
            reader.hashes().ok().map(|hs| hs.iterate(None).copied().collect::<Vec<_>>())
        })
        .collect();
    Hashset::build(&new_dir.join("hashes"), share_digest_lists, root.config.pool.fsync)?;

    let end_time = now_secs();
    let number = next_backup_number(&existing);
    let info = BackupInfo {
        level: if full { 0 } else { 1 },
        start_time,
        end_time,
        reference: if full { None } else { reference.map(|(n, _)| n) },
        refhost: None,
        failed: failed.then_some(true),
    };
    write_json_sidecar(&new_dir.join("info.json"), &info, root.config.pool.fsync)?;

    let final_dir = host_dir.join(number.to_string());
    std::fs::rename(&new_dir, &final_dir).with_context(|| format!("unable to finalize backup into {final_dir:?}"))?;
    fbk_tools::fs::sync_parent_dir(&final_dir)?;

    log::info!(
        "host {}: backup {number} finalized (level {}, failed={})",
        host.name,
        info.level,
        info.failed.unwrap_or(false)
    );
    Ok(info)
}

fn run_share(
    root: &Root,
    host_dir: &Path,
    share_dir: &Path,
    share: &ShareConfig,
    reference_number: Option<u32>,
    full: bool,
) -> Result<(), Error> {
    let mut writer = ShareWriter::create(share_dir, &share.name, root.config.pool.fsync)?;

    let reference_number = if full { None } else { reference_number };
    let reference_share_path = reference_number
        .map(|n| host_dir.join(n.to_string()).join("share").join(mangle(&share.name)))
        .filter(|p| p.exists());
    let reference_reader = reference_share_path.map(ShareReader::open);

    let reference_hashes_path = reference_number
        .map(|n| host_dir.join(n.to_string()).join("hashes"))
        .filter(|p| p.exists());
    let reference_hashset = reference_hashes_path.map(|p| Hashset::load(&p)).transpose()?;

    let start_time = now_secs();
    let mut ctx = TransferContext {
        pool: &root.pool,
        writer: &mut writer,
        reference: reference_reader.as_ref(),
        reference_hashset: reference_hashset.as_ref(),
        share,
        whole_file: !full,
    };

    let mut provider: Box<dyn TransferProvider> = match &share.host {
        Some(remote_host) => Box::new(
            RsyncTransfer::new(
                rsync_helper_path(),
                share.path.clone().unwrap_or_else(|| share.mountpoint.clone()),
            )
            .with_remote(remote_host.clone(), share.port, share.user.clone()),
        ),
        None => Box::new(LocalWalker::new()),
    };

    let result = provider.transfer(&mut ctx);
    let end_time = now_secs();

    let info = ShareInfo {
        name: share.name.clone(),
        path: share.path.clone().unwrap_or_else(|| share.mountpoint.clone()),
        mountpoint: share.mountpoint.clone(),
        start_time,
        end_time,
        error: result.as_ref().err().map(|err| format!("{err:#}")),
    };
    writer.finish(info)?;
    result
}

/// The external rsync-delta helper's path is not configuration this
/// crate owns (§1 excludes the rsync wire protocol itself); a real
/// deployment overrides this via `PATH` or a wrapper, this is just the
/// conventional binary name `RsyncTransfer::spawn` looks up.
fn rsync_helper_path() -> PathBuf {
    PathBuf::from("fruitbak-rsync-helper")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_backup_number_starts_at_zero_and_increments() {
        assert_eq!(next_backup_number(&[]), 0);
        assert_eq!(next_backup_number(&[0, 1, 3]), 4);
    }
}
