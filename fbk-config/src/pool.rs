//! Pool-wide settings (§3 "Chunk", §4.3 storage filter chain).

use serde::{Deserialize, Serialize};

use fbk_api_types::FsyncLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    None,
    Gzip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Path to the key file consumed by the Encrypt storage filter.
    pub keyfile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_chunksize")]
    pub chunksize: u64,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    #[serde(default)]
    pub fsync: FsyncLevel,
    #[serde(default = "default_maxjobs")]
    pub maxjobs: u32,
}

fn default_chunksize() -> u64 {
    2 * 1024 * 1024
}

fn default_maxjobs() -> u32 {
    1
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunksize: default_chunksize(),
            compression: Compression::None,
            encryption: None,
            fsync: FsyncLevel::default(),
            maxjobs: default_maxjobs(),
        }
    }
}
