//! A single-file TOML loader. The full file-include section-config system
//! a fleet-scale deployment would want is explicitly out of scope; one
//! file naming the pool and its hosts is enough to drive the CLI and the
//! test suite.

use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::{HostConfig, PoolConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub host: Vec<HostConfig>,
}

pub fn load_config(path: &Path) -> Result<Config, Error> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path:?}"))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [pool]
            chunksize = 1048576

            [[host]]
            name = "h1"
            [[host.shares]]
            name = "root"
            mountpoint = "/"
            path = "/srv/h1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pool.chunksize, 1048576);
        assert_eq!(config.host.len(), 1);
        assert_eq!(config.host[0].shares[0].name, "root");
    }
}
