//! Inter-process reader-writer locks built on fcntl record locks with the
//! non-blocking `F_SETLK` command.
//!
//! [`ProcessLocker`] backs the coarse-grained locks of the concurrency
//! model: the Fruitbak-wide lock (shared during a backup run, exclusive
//! during garbage collection) and the per-host backup lock.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Error};

fn try_lock(file: &File, ltype: i32) -> Result<(), Error> {
    let op = libc::flock {
        l_type: ltype as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLK(&op))?;
    Ok(())
}

fn unlock_or_downgrade(file: &File, ltype: i32) {
    let op = libc::flock {
        l_type: ltype as i16,
        l_whence: libc::SEEK_SET as i16,
        l_start: 0,
        l_len: 0,
        l_pid: 0,
    };
    if let Err(err) = nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETLKW(&op)) {
        panic!("unable to update process lock state - {err}");
    }
}

/// Inter-process reader-writer lock, e.g. `<rootdir>/lock` or
/// `<host>/new/lock`.
pub struct ProcessLocker {
    file: File,
    exclusive: bool,
    shared_count: usize,
}

pub struct ProcessLockSharedGuard {
    locker: Arc<Mutex<ProcessLocker>>,
}

impl Drop for ProcessLockSharedGuard {
    fn drop(&mut self) {
        let mut data = self.locker.lock().unwrap();
        if data.shared_count == 0 {
            panic!("unexpected ProcessLocker state");
        }
        data.shared_count -= 1;
        if data.shared_count == 0 && !data.exclusive {
            unlock_or_downgrade(&data.file, libc::F_UNLCK);
        }
    }
}

pub struct ProcessLockExclusiveGuard {
    locker: Arc<Mutex<ProcessLocker>>,
}

impl Drop for ProcessLockExclusiveGuard {
    fn drop(&mut self) {
        let mut data = self.locker.lock().unwrap();
        if !data.exclusive {
            panic!("unexpected ProcessLocker state");
        }
        data.exclusive = false;
        let ltype = if data.shared_count != 0 {
            libc::F_RDLCK
        } else {
            libc::F_UNLCK
        };
        unlock_or_downgrade(&data.file, ltype);
    }
}

impl ProcessLocker {
    /// Open (creating if necessary) the lock file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Arc<Mutex<Self>>, Error> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        Ok(Arc::new(Mutex::new(Self {
            file,
            exclusive: false,
            shared_count: 0,
        })))
    }

    /// Acquire a shared lock. Fails immediately (never blocks) if another
    /// process holds the lock exclusively.
    pub fn try_shared(locker: &Arc<Mutex<Self>>) -> Result<ProcessLockSharedGuard, Error> {
        let mut data = locker.lock().unwrap();
        if data.shared_count == 0 && !data.exclusive {
            if let Err(err) = try_lock(&data.file, libc::F_RDLCK) {
                bail!("unable to get shared lock - {err}");
            }
        }
        data.shared_count += 1;
        Ok(ProcessLockSharedGuard {
            locker: locker.clone(),
        })
    }

    /// Acquire an exclusive lock. Fails immediately if any process (this
    /// one included) already holds a shared or exclusive lock.
    pub fn try_exclusive(locker: &Arc<Mutex<Self>>) -> Result<ProcessLockExclusiveGuard, Error> {
        let mut data = locker.lock().unwrap();
        if data.exclusive || data.shared_count != 0 {
            bail!("already locked");
        }
        if let Err(err) = try_lock(&data.file, libc::F_WRLCK) {
            bail!("unable to get exclusive lock - {err}");
        }
        data.exclusive = true;
        Ok(ProcessLockExclusiveGuard {
            locker: locker.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_stack_and_release() {
        let dir = std::env::temp_dir().join(format!("fbk-lock-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lock");
        let locker = ProcessLocker::new(&path).unwrap();

        let g1 = ProcessLocker::try_shared(&locker).unwrap();
        let g2 = ProcessLocker::try_shared(&locker).unwrap();
        assert!(ProcessLocker::try_exclusive(&locker).is_err());
        drop(g1);
        drop(g2);
        let g3 = ProcessLocker::try_exclusive(&locker).unwrap();
        drop(g3);

        std::fs::remove_dir_all(&dir).ok();
    }
}
