//! Content-addressed chunk pool, per-share directory index, and the
//! filesystem-level storage tree underneath both.
//!
//! # Data model
//!
//! The pool stores chunks keyed by the digest of their plaintext content
//! (`Pool::digest_of`). A file is represented as a [`DigestList`]: the
//! concatenation of its chunks' digests, in order, every chunk exactly
//! `chunksize` bytes except possibly the last. [`PoolWriter`] produces a
//! `DigestList` from a stream of bytes; [`PoolReader`] turns a
//! `DigestList` back into random-access byte ranges.
//!
//! A share's directory entries (its [`Dentry`] values) live in a
//! write-once, read-many sorted key-value store, the "hardhat" format
//! (`hardhat` module). [`ShareWriter`] builds one per share during a
//! backup; [`ShareReader`] serves lookups, listings and recursive walks
//! against the finished file.
//!
//! [`Hashset`] is the sorted, deduplicated digest set used both to skip
//! re-storing chunks already known to a reference backup and, unioned
//! across every backup, to drive garbage collection.
//!
//! # Storage tree
//!
//! `storage` implements the filter chain of §4.3: a filesystem leaf
//! wrapped by zero or more filters (compress, encrypt, verify), each
//! transforming the bytes written to/read from its delegate without
//! changing the digest identity (except the encrypt filter's digest-name
//! transform, used only for on-disk naming).

pub mod dentry;
pub mod file_formats;
pub mod hardhat;
pub mod hashset;
pub mod pool;
pub mod pool_reader;
pub mod pool_writer;
pub mod share;
pub mod storage;

pub use dentry::{Dentry, DentryKind};
pub use hardhat::{HardhatMaker, HardhatReader};
pub use hashset::Hashset;
pub use pool::Pool;
pub use pool_reader::PoolReader;
pub use pool_writer::{PoolWriter, PriorSource};
pub use share::{ShareInfo, ShareReader, ShareWriter};

pub use fbk_tools::digest::{digest_of, Digest, DigestHasher, DIGEST_BYTES};

pub type DigestList = Vec<Digest>;
