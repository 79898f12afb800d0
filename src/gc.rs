//! Garbage collector (C12): under the Fruitbak-wide exclusive lock,
//! removes expired backup directories, builds the live-digest union, and
//! reconciles it against the pool via a pipe-paired deletion child.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::io::FromRawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Error};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, fork, pipe, ForkResult};

use fbk_api_types::GarbageCollectionStatus;
use fbk_config::ExpiryPolicy;
use fbk_datastore::Hashset;
use fbk_tools::digest::{from_hex, to_hex};
use fbk_tools::process_lock::ProcessLocker;

use crate::backup::{backup_records, list_backups};
use crate::expiry::evaluate;
use crate::root::Root;

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub fn run_gc(root: &Root) -> Result<GarbageCollectionStatus, Error> {
    let _exclusive = ProcessLocker::try_exclusive(&root.locker)
        .context("unable to acquire the Fruitbak-wide lock exclusively (a backup is running)")?;

    let mut status = GarbageCollectionStatus::new();
    let now = now_secs();

    let mut host_digest_lists = Vec::new();
    for (host_name, host_dir) in root.host_dirs()? {
        let records = backup_records(&host_dir)?;
        let policy = root
            .config
            .host
            .iter()
            .find(|h| h.name == host_name)
            .and_then(|h| h.expiry.clone())
            .unwrap_or_else(ExpiryPolicy::default_policy);
        let expired = evaluate(&policy, &records, now);

        for record in &records {
            if expired.contains(&record.number) {
                let dir = host_dir.join(record.number.to_string());
                std::fs::remove_dir_all(&dir).with_context(|| format!("unable to remove expired backup {dir:?}"))?;
                log::info!("gc: removed expired backup {host_name}/{}", record.number);
            }
        }

        let surviving = list_backups(&host_dir)?;
        let mut backup_digest_lists = Vec::new();
        for number in surviving {
            let hashes_path = host_dir.join(number.to_string()).join("hashes");
            if hashes_path.exists() {
                let hashset = Hashset::load(&hashes_path)?;
                backup_digest_lists.push(hashset.iterate(None).copied().collect::<Vec<_>>());
            }
        }
        let host_hashes_path = host_dir.join("hashes");
        Hashset::build(&host_hashes_path, backup_digest_lists, root.config.pool.fsync)?;
        let host_hashset = Hashset::load(&host_hashes_path)?;
        host_digest_lists.push(host_hashset.iterate(None).copied().collect::<Vec<_>>());
    }

    let root_hashes_path = root.rootdir.join("hashes");
    Hashset::build(&root_hashes_path, host_digest_lists, root.config.pool.fsync)?;
    let live = Hashset::load(&root_hashes_path)?;

    let (available, deletion_result) = reconcile_pool(root, &live, &mut status)?;
    deletion_result?;

    let available_path = root.rootdir.join("available");
    Hashset::sort_and_write(&available_path, available, root.config.pool.fsync)?;
    let available_set = Hashset::load(&available_path)?;

    let mut missing = Vec::new();
    for digest in live.iterate(None) {
        if !available_set.contains(digest) {
            missing.push(*digest);
        }
    }
    status.missing_chunks = missing.len() as u64;
    status.disk_chunks = available_set.len() as u64;

    let missing_path = root.rootdir.join("missing");
    Hashset::sort_and_write(&missing_path, missing, root.config.pool.fsync)?;
    fbk_tools::fs::sync_parent_dir(&available_path).context("fsync of available file failed; this is a fatal integrity risk")?;
    fbk_tools::fs::sync_parent_dir(&missing_path).context("fsync of missing file failed; this is a fatal integrity risk")?;

    if status.missing_chunks > 0 {
        log::warn!(
            "gc: {} chunk(s) referenced by surviving backups are missing from the pool",
            status.missing_chunks
        );
    }

    Ok(status)
}

/// Iterates the pool, forking a deletion child to remove every digest
/// not in `live` while the parent keeps walking (§4.12 steps 2-5). The
/// child is this same process image, not an external helper: it shares
/// the already-open `Pool`, communicating only through the backpressure
/// of the pipe.
fn reconcile_pool(
    root: &Root,
    live: &Hashset,
    status: &mut GarbageCollectionStatus,
) -> Result<(Vec<fbk_tools::digest::Digest>, Result<(), Error>), Error> {
    let (read_fd, write_fd) = pipe().context("unable to create GC deletion pipe")?;

    match unsafe { fork() }.context("unable to fork GC deletion child")? {
        ForkResult::Child => {
            let _ = close(write_fd);
            let from_parent = unsafe { File::from_raw_fd(read_fd) };
            let mut removed = 0u64;
            for line in BufReader::new(from_parent).lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(_) => break,
                };
                if line.is_empty() {
                    continue;
                }
                let digest = match from_hex(&line) {
                    Ok(d) => d,
                    Err(err) => {
                        log::warn!("gc deletion child: malformed digest {line:?}: {err:#}");
                        continue;
                    }
                };
                if let Err(err) = root.pool.remove(&digest) {
                    log::warn!("gc deletion child: failed to remove {line}: {err:#}");
                    std::process::exit(1);
                }
                removed += 1;
            }
            log::info!("gc deletion child: removed {removed} chunk(s)");
            std::process::exit(0);
        }
        ForkResult::Parent { child } => {
            let _ = close(read_fd);
            let to_child = unsafe { File::from_raw_fd(write_fd) };
            let mut to_child = BufWriter::new(to_child);

            let mut available = Vec::new();
            let iter_result = (|| -> Result<(), Error> {
                for batch in root.pool.iterate()? {
                    for digest in batch? {
                        if live.contains(&digest) {
                            available.push(digest);
                        } else {
                            writeln!(to_child, "{}", to_hex(&digest))?;
                            status.removed_chunks += 1;
                        }
                    }
                }
                Ok(())
            })();
            drop(to_child); // closes the write end, signaling EOF to the child

            let wait_result = waitpid(child, None).context("waiting for GC deletion child");
            let deletion_result = iter_result.and_then(|()| {
                match wait_result? {
                    WaitStatus::Exited(_, 0) => Ok(()),
                    WaitStatus::Exited(_, code) => bail!("GC deletion child exited with status {code}"),
                    WaitStatus::Signaled(_, signal, _) => bail!("GC deletion child was killed by signal {signal}"),
                    other => bail!("GC deletion child ended in unexpected state {other:?}"),
                }
            });
            Ok((available, deletion_result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbk_api_types::FsyncLevel;
    use fbk_config::{Config, PoolConfig};

    fn root(dir: &std::path::Path) -> Root {
        Root::open(
            dir,
            Config {
                pool: PoolConfig {
                    fsync: FsyncLevel::None,
                    ..Default::default()
                },
                host: Vec::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn gc_on_an_empty_pool_reports_no_missing_chunks() {
        let dir = std::env::temp_dir().join(format!("fbk-gc-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let root = root(&dir);

        let status = run_gc(&root).unwrap();
        assert_eq!(status.missing_chunks, 0);
        assert_eq!(status.removed_chunks, 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
