//! The content-addressed chunk pool (C4): owns the storage tree root
//! and the digest/chunking configuration, and hands out readers and
//! writers over it.

use std::path::{Path, PathBuf};

use anyhow::Error;

use fbk_config::{Compression, PoolConfig};

use crate::storage::{Compress, Encrypt, EncryptConfig, FilesystemStore, FilterNode, StorageNode, Verify};
use crate::{DigestList, PoolReader, PoolWriter};
use fbk_tools::digest::{digest_of, Digest, DIGEST_BYTES};

use crate::storage::DigestBatch;

pub struct Pool {
    root: Box<dyn StorageNode>,
    chunksize: u64,
}

impl Pool {
    /// Builds the filter chain in the conventional order
    /// `verify -> encrypt -> compress -> filesystem`, outermost first.
    pub fn open(pool_dir: impl Into<PathBuf>, config: &PoolConfig) -> Result<Self, Error> {
        let mut node: Box<dyn StorageNode> = Box::new(FilesystemStore::open(pool_dir, config.fsync)?);

        if matches!(config.compression, Compression::Gzip) {
            node = Box::new(FilterNode::new(Compress::default(), node));
        }

        if let Some(enc) = &config.encryption {
            let enc_config = EncryptConfig::load(Path::new(&enc.keyfile))?;
            node = Box::new(FilterNode::new(Encrypt::new(enc_config), node));
        }

        node = Box::new(FilterNode::new(Verify, node));

        Ok(Self {
            root: node,
            chunksize: config.chunksize,
        })
    }

    pub fn hashalgo(&self) -> &'static str {
        "sha256"
    }

    pub fn hashwidth(&self) -> usize {
        DIGEST_BYTES
    }

    pub fn chunksize(&self) -> u64 {
        self.chunksize
    }

    pub fn digest_of(data: &[u8]) -> Digest {
        digest_of(data)
    }

    pub fn store(&self, digest: &Digest, data: &[u8]) -> Result<(), Error> {
        self.root.store(digest, data)
    }

    pub fn retrieve(&self, digest: &Digest) -> Result<Option<Vec<u8>>, Error> {
        self.root.retrieve(digest)
    }

    pub fn has(&self, digest: &Digest) -> Result<bool, Error> {
        self.root.has(digest)
    }

    pub fn remove(&self, digest: &Digest) -> Result<(), Error> {
        self.root.remove(digest)
    }

    pub fn iterate(&self) -> Result<Box<dyn Iterator<Item = Result<DigestBatch, Error>> + '_>, Error> {
        self.root.iterate()
    }

    pub fn writer(&self) -> PoolWriter<'_> {
        PoolWriter::new(self)
    }

    pub fn reader(&self, digests: DigestList, total_size: u64) -> PoolReader<'_> {
        PoolReader::new(self, digests, total_size)
    }
}
