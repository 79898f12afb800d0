//! `init` subcommand: sets up an empty root directory.

use std::path::Path;

use anyhow::Error;
use fruitbak::Root;

pub fn run(rootdir: &Path, config: Option<&Path>) -> Result<(), Error> {
    let config = crate::config::load(config)?;
    Root::init(rootdir, config)?;
    log::info!("initialized fruitbak root at {rootdir:?}");
    Ok(())
}
