//! Single root handle carrying the pool, configuration and the
//! Fruitbak-wide lock (§9 "Global mutable state"): every subsystem in
//! this crate takes a `&Root` rather than reaching for global state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};

use fbk_api_types::HostName;
use fbk_config::Config;
use fbk_datastore::Pool;
use fbk_tools::process_lock::ProcessLocker;
use proxmox_sys::fs::CreateOptions;

pub struct Root {
    pub rootdir: PathBuf,
    pub pool: Pool,
    pub config: Config,
    pub locker: Arc<Mutex<ProcessLocker>>,
}

impl Root {
    /// Opens an existing Fruitbak root directory, or creates the pool
    /// subtree on first use (the pool itself lazily creates its
    /// directories; this only makes sure `host/` and the lockfile exist).
    pub fn open(rootdir: impl Into<PathBuf>, config: Config) -> Result<Self, Error> {
        let rootdir = rootdir.into();
        proxmox_sys::fs::create_path(&rootdir, Some(CreateOptions::new()), Some(CreateOptions::new()))
            .with_context(|| format!("unable to create root directory {rootdir:?}"))?;
        proxmox_sys::fs::create_path(
            &rootdir.join("host"),
            Some(CreateOptions::new()),
            Some(CreateOptions::new()),
        )?;
        let pool = Pool::open(rootdir.join("pool"), &config.pool)?;
        let locker = ProcessLocker::new(rootdir.join("lock"))?;
        Ok(Self {
            rootdir,
            pool,
            config,
            locker,
        })
    }

    /// `init` (§6 CLI surface): same as `open`, kept as a separate name
    /// for the CLI subcommand that expects to be run once against an
    /// empty directory.
    pub fn init(rootdir: impl Into<PathBuf>, config: Config) -> Result<Self, Error> {
        Self::open(rootdir, config)
    }

    pub fn host_dir(&self, host: &HostName) -> PathBuf {
        host_dir(&self.rootdir, host)
    }

    /// Every host directory present on disk, sorted by name; a host can
    /// have a directory without (yet) appearing in the loaded config.
    pub fn host_dirs(&self) -> Result<Vec<(HostName, PathBuf)>, Error> {
        let host_root = self.rootdir.join("host");
        let mut out = Vec::new();
        if !host_root.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&host_root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(host_name) = HostName::new(name) {
                    out.push((host_name, entry.path()));
                }
            }
        }
        out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Ok(out)
    }
}

pub fn host_dir(rootdir: &Path, host: &HostName) -> PathBuf {
    rootdir.join("host").join(host.as_str())
}
