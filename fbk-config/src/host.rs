//! Host and share declarations (§3 "Host", "Share").

use serde::{Deserialize, Serialize};

use fbk_api_types::HostName;

use crate::ExpiryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    pub name: String,
    /// Mountpoint excludes below this path are normalized relative to it
    /// before being turned into rsync `--exclude=` options (§4.9).
    pub mountpoint: String,
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Connection target for the rsync-delta provider; absent for shares
    /// served by the local walker (C10).
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: HostName,
    pub shares: Vec<ShareConfig>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<ExpiryPolicy>,
    /// Max number of hosts backed up concurrently is a pool-wide setting
    /// (§5 "maxjobs"); a host only carries its own pre/post commands.
    #[serde(default)]
    pub pre_command: Option<String>,
    #[serde(default)]
    pub post_command: Option<String>,
}
