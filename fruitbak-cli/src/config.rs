//! Resolves the CLI's `--rootdir`/`--config` flags into an opened [`Root`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use fbk_config::Config;
use fruitbak::Root;

pub fn load(config: Option<&Path>) -> Result<Config, Error> {
    match config {
        Some(path) => fbk_config::load_config(path).with_context(|| format!("failed to load {path:?}")),
        None => {
            let default_path = PathBuf::from(fbk_buildcfg::configdir!("/fruitbak.toml"));
            if default_path.exists() {
                fbk_config::load_config(&default_path).with_context(|| format!("failed to load {default_path:?}"))
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn open_root(rootdir: &Path, config: Option<&Path>) -> Result<Root, Error> {
    let config = load(config)?;
    Root::open(rootdir, config).with_context(|| format!("failed to open fruitbak root {rootdir:?}"))
}
