//! Spawns the external rsync-delta helper process and drives [`Session`]
//! against its pipes (§4.9). The rsync wire protocol itself is treated
//! as an external collaborator — this crate frames and interprets the
//! small RPC the helper speaks, the same way the rest of this codebase
//! shells out to an external binary rather than reimplementing its
//! protocol from scratch.

use std::io::{BufReader, BufWriter};
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Error};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use fbk_tools::child::terminate_and_reap;

use crate::provider::{TransferContext, TransferProvider};
use crate::session::Session;

/// Drives one share through an external rsync-delta helper process.
pub struct RsyncTransfer {
    helper: std::path::PathBuf,
    remote_host: Option<String>,
    remote_port: Option<u16>,
    remote_user: Option<String>,
    remote_path: String,
}

impl RsyncTransfer {
    pub fn new(helper: impl Into<std::path::PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            helper: helper.into(),
            remote_host: None,
            remote_port: None,
            remote_user: None,
            remote_path: remote_path.into(),
        }
    }

    pub fn with_remote(mut self, host: impl Into<String>, port: Option<u16>, user: Option<String>) -> Self {
        self.remote_host = Some(host.into());
        self.remote_port = port;
        self.remote_user = user;
        self
    }

    fn spawn(&self, excludes: &[String]) -> Result<Child, Error> {
        let mut cmd = Command::new(&self.helper);
        cmd.arg(&self.remote_path);
        if let Some(host) = &self.remote_host {
            cmd.arg("--host").arg(host);
        }
        if let Some(port) = self.remote_port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(user) = &self.remote_user {
            cmd.arg("--user").arg(user);
        }
        for exclude in excludes {
            cmd.arg(format!("--exclude={exclude}"));
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        cmd.spawn().with_context(|| format!("unable to spawn rsync-delta helper {:?}", self.helper))
    }
}

impl TransferProvider for RsyncTransfer {
    fn transfer(&mut self, ctx: &mut TransferContext) -> Result<(), Error> {
        let excludes = normalize_excludes(&ctx.share.mountpoint, &ctx.share.excludes);
        log::debug!("spawning rsync-delta helper for share {:?} ({} excludes)", ctx.share.name, excludes.len());
        let mut child = self.spawn(&excludes)?;
        let stdout = BufReader::new(child.stdout.take().expect("helper spawned with piped stdout"));
        let stdin = BufWriter::new(child.stdin.take().expect("helper spawned with piped stdin"));

        let mut session = Session::new(ctx.pool, ctx.writer, ctx.reference, ctx.reference_hashset, ctx.whole_file);
        match session.run(stdout, stdin) {
            Ok(()) => {
                let status = waitpid(Pid::from_raw(child.id() as i32), None).context("waiting for rsync-delta helper to exit")?;
                check_exit_status(status)
            }
            Err(err) => {
                log::warn!("share {:?} transfer failed, terminating helper: {err:#}", ctx.share.name);
                let _ = terminate_and_reap(&mut child);
                Err(err)
            }
        }
    }
}

fn check_exit_status(status: WaitStatus) -> Result<(), Error> {
    match status {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => bail!("rsync-delta helper exited with status {code}"),
        WaitStatus::Signaled(_, signal, _) => bail!("rsync-delta helper was killed by signal {signal}"),
        other => bail!("rsync-delta helper ended in unexpected state {other:?}"),
    }
}

/// Converts host/share exclude globs into rsync `--exclude=` values,
/// normalized relative to the share's mountpoint; globs whose absolute
/// anchor lies outside the mountpoint are skipped (§4.9).
pub fn normalize_excludes(mountpoint: &str, globs: &[String]) -> Vec<String> {
    let mountpoint = mountpoint.trim_end_matches('/');
    globs
        .iter()
        .filter_map(|glob| {
            if let Some(rest) = glob.strip_prefix(mountpoint) {
                Some(rest.trim_start_matches('/').to_string())
            } else if glob.starts_with('/') {
                None
            } else {
                Some(glob.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_globs_under_the_mountpoint() {
        let globs = vec!["/srv/data/tmp/*".to_string(), "*.log".to_string(), "/etc/skip".to_string()];
        let normalized = normalize_excludes("/srv/data", &globs);
        assert_eq!(normalized, vec!["tmp/*".to_string(), "*.log".to_string()]);
    }
}
