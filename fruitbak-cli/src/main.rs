//! Thin command-line front end over the `fruitbak` library crate (§6).
//!
//! This binary owns argv parsing, logging initialization and exit code
//! mapping; every actual operation (backup orchestration, expiry,
//! garbage collection, share traversal) lives in `fruitbak`/`fbk-*`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Error;
use clap::{Parser, Subcommand};

mod backup;
mod browse;
mod config;
mod gc;
mod init;

/// Disk-based, deduplicating, multi-host backup system.
#[derive(Parser)]
#[command(name = "fruitbak", version = fbk_buildcfg::FRUITBAK_PKG_VERSION)]
struct Cli {
    /// Root directory holding the pool and host trees.
    #[arg(long, global = true, default_value = fbk_buildcfg::DEFAULT_ROOTDIR)]
    rootdir: PathBuf,

    /// Configuration file; defaults to `/etc/fruitbak/fruitbak.toml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty root directory.
    Init,
    /// Back up one or more configured hosts (all of them if none given).
    #[command(alias = "bu")]
    Backup {
        /// Force a full backup of every share.
        #[arg(long)]
        full: bool,
        /// Force a full backup if the reference is older than this (e.g. `7d`).
        #[arg(long, value_name = "INTERVAL")]
        full_after: Option<String>,
        hosts: Vec<String>,
    },
    /// List hosts, backups, shares, or a share's directory tree.
    Ls {
        host: Option<String>,
        backup: Option<u32>,
        share: Option<String>,
        path: Option<String>,
    },
    /// Print a file's contents to stdout.
    Cat {
        host: String,
        backup: u32,
        share: String,
        path: String,
    },
    /// Stream a subtree as a tar archive to stdout.
    Tar {
        host: String,
        backup: u32,
        share: String,
        path: String,
    },
    /// Reclaim expired backups and unreferenced pool chunks.
    Gc,
    /// Re-read every chunk in the pool, verifying its digest.
    Scrub { numprocs: Option<usize> },
}

fn run(cli: &Cli) -> Result<bool, Error> {
    match &cli.command {
        Command::Init => {
            init::run(&cli.rootdir, cli.config.as_deref())?;
            Ok(true)
        }
        Command::Backup { full, full_after, hosts } => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            backup::run(&root, hosts, *full, full_after.as_deref())
        }
        Command::Ls { host, backup, share, path } => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            browse::ls(&root, host.as_deref(), *backup, share.as_deref(), path.as_deref())?;
            Ok(true)
        }
        Command::Cat { host, backup, share, path } => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            browse::cat(&root, host, *backup, share, path)?;
            Ok(true)
        }
        Command::Tar { host, backup, share, path } => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            browse::tar(&root, host, *backup, share, path)?;
            Ok(true)
        }
        Command::Gc => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            gc::gc(&root)
        }
        Command::Scrub { numprocs } => {
            let root = config::open_root(&cli.rootdir, cli.config.as_deref())?;
            gc::scrub(&root, *numprocs)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::from(0),
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
