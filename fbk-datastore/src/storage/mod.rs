//! The storage backend tree (C3): a filesystem leaf wrapped in zero or
//! more filter nodes. Every node, leaf or filter, answers the same
//! capability so filters compose transparently and the pool never has to
//! know how many layers it is talking through.

mod compress;
mod encrypt;
mod filesystem;
mod verify;

pub use compress::Compress;
pub use encrypt::{Encrypt, EncryptConfig};
pub use filesystem::FilesystemStore;
pub use verify::Verify;

use anyhow::Error;

use fbk_tools::digest::Digest;

/// A batch of digests from one directory-level step of `iterate`; kept
/// as a `Vec` rather than yielding one digest at a time so a filter that
/// has to decrypt digest names can do so without changing the iterator
/// item type.
pub type DigestBatch = Vec<Digest>;

pub trait StorageNode: Send + Sync {
    /// Store `data`, the plaintext content identified by `digest`. A
    /// no-op if the digest is already present (content-addressed,
    /// idempotent).
    fn store(&self, digest: &Digest, data: &[u8]) -> Result<(), Error>;

    /// Fetch and reconstitute the plaintext for `digest`, or `None` if
    /// it is absent anywhere in the chain.
    fn retrieve(&self, digest: &Digest) -> Result<Option<Vec<u8>>, Error>;

    fn has(&self, digest: &Digest) -> Result<bool, Error>;

    fn remove(&self, digest: &Digest) -> Result<(), Error>;

    /// Enumerate every digest present, in arbitrary (pool-iterator)
    /// order, as batches for cheap incremental progress reporting.
    fn iterate(&self) -> Result<Box<dyn Iterator<Item = Result<DigestBatch, Error>> + '_>, Error>;
}

/// A filter transforms the bytes stored/retrieved for one digest without
/// changing what the digest identifies. `Encrypt` additionally
/// transforms the digest used to name the object on disk; every other
/// filter passes the digest through unchanged.
pub trait StorageFilter: Send + Sync {
    fn apply(&self, digest: &Digest, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn unapply(&self, digest: &Digest, data: Vec<u8>) -> Result<Vec<u8>, Error>;

    fn storage_digest(&self, digest: &Digest) -> Digest {
        *digest
    }

    fn unstorage_digest(&self, digest: &Digest) -> Digest {
        *digest
    }
}

/// Wraps a `StorageFilter` around a delegate node, completing the
/// `StorageNode` capability generically for any filter.
pub struct FilterNode<F> {
    filter: F,
    delegate: Box<dyn StorageNode>,
}

impl<F: StorageFilter> FilterNode<F> {
    pub fn new(filter: F, delegate: Box<dyn StorageNode>) -> Self {
        Self { filter, delegate }
    }
}

impl<F: StorageFilter> StorageNode for FilterNode<F> {
    fn store(&self, digest: &Digest, data: &[u8]) -> Result<(), Error> {
        let transformed = self.filter.apply(digest, data)?;
        let storage_digest = self.filter.storage_digest(digest);
        self.delegate.store(&storage_digest, &transformed)
    }

    fn retrieve(&self, digest: &Digest) -> Result<Option<Vec<u8>>, Error> {
        let storage_digest = self.filter.storage_digest(digest);
        match self.delegate.retrieve(&storage_digest)? {
            Some(data) => Ok(Some(self.filter.unapply(digest, data)?)),
            None => Ok(None),
        }
    }

    fn has(&self, digest: &Digest) -> Result<bool, Error> {
        let storage_digest = self.filter.storage_digest(digest);
        self.delegate.has(&storage_digest)
    }

    fn remove(&self, digest: &Digest) -> Result<(), Error> {
        let storage_digest = self.filter.storage_digest(digest);
        self.delegate.remove(&storage_digest)
    }

    fn iterate(&self) -> Result<Box<dyn Iterator<Item = Result<DigestBatch, Error>> + '_>, Error> {
        let inner = self.delegate.iterate()?;
        Ok(Box::new(inner.map(move |batch| {
            batch.map(|digests| {
                digests
                    .iter()
                    .map(|d| self.filter.unstorage_digest(d))
                    .collect()
            })
        })))
    }
}
