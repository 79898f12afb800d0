//! Grace-then-kill teardown for the helper child processes spawned by the
//! rsync-delta transfer (C9) and the garbage collector's deletion worker
//! (C12): on any exception the parent TERMs the child, waits up to a
//! grace period, then KILLs and always reaps it.

use std::process::Child;
use std::time::{Duration, Instant};

use anyhow::{Context, Error};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

pub const TERM_GRACE: Duration = Duration::from_secs(2);
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Send SIGTERM, poll for up to `TERM_GRACE`, then SIGKILL and poll for
/// up to `KILL_GRACE`, finally blocking on `waitpid` regardless. The
/// child is reaped through `nix::sys::wait` throughout, never mixed with
/// `std::process::Child::wait`, since both would otherwise race to reap
/// the same pid.
pub fn terminate_and_reap(child: &mut Child) -> Result<WaitStatus, Error> {
    let pid = Pid::from_raw(child.id() as i32);

    if let Some(status) = poll_exit(pid, Duration::ZERO)? {
        return Ok(status);
    }

    let _ = kill(pid, Signal::SIGTERM);
    if let Some(status) = poll_exit(pid, TERM_GRACE)? {
        return Ok(status);
    }

    let _ = kill(pid, Signal::SIGKILL);
    if let Some(status) = poll_exit(pid, KILL_GRACE)? {
        return Ok(status);
    }

    // Last resort: a blocking wait, since the process must eventually die
    // once killed.
    waitpid(pid, None).context("waitpid after SIGKILL")
}

fn poll_exit(pid: Pid, grace: Duration) -> Result<Option<WaitStatus>, Error> {
    let deadline = Instant::now() + grace;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => return Ok(Some(status)),
            Err(nix::errno::Errno::ECHILD) => return Ok(Some(WaitStatus::StillAlive)),
            Err(err) => return Err(err).context("waitpid"),
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
