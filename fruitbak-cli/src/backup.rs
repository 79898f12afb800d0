//! `backup`/`bu` subcommand: runs one or more configured hosts and
//! reports a non-zero exit for any host that failed.

use anyhow::{bail, Error};
use fbk_config::TimeSpan;
use fruitbak::{run_host_backup, BackupOptions, Root};

/// Runs `hosts` (every configured host if empty). An unknown host name is
/// an invocation error; a host whose backup fails is reported but does not
/// stop the others (§5 "resource contention ... other hosts proceed").
pub fn run(root: &Root, hosts: &[String], full: bool, full_after: Option<&str>) -> Result<bool, Error> {
    let full_after = full_after.map(|s| s.parse::<TimeSpan>()).transpose()?;
    let opts = BackupOptions {
        full,
        full_after,
        refbackup: None,
    };

    let targets: Vec<_> = if hosts.is_empty() {
        root.config.host.iter().collect()
    } else {
        hosts
            .iter()
            .map(|name| {
                root.config
                    .host
                    .iter()
                    .find(|h| h.name.as_str() == name)
                    .ok_or_else(|| anyhow::anyhow!("no configured host named {name:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    if targets.is_empty() {
        bail!("no hosts configured");
    }

    let mut all_ok = true;
    for host in targets {
        match run_host_backup(root, host, &opts) {
            Ok(info) if info.failed.unwrap_or(false) => {
                log::error!("host {}: backup completed with share failures", host.name);
                all_ok = false;
            }
            Ok(_) => log::info!("host {}: backup complete", host.name),
            Err(err) => {
                log::error!("host {}: backup failed: {err:#}", host.name);
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}
