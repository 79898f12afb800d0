//! Filesystem, locking and encoding helpers shared by the fruitbak crates.
//!
//! Nothing in this crate is specific to the pool/index/backup domain; it
//! only wraps the primitives the rest of the workspace builds on top of
//! (atomic file replace, fcntl-based process locks, the on-disk share-name
//! mangling scheme, digests, and grace-then-kill child process teardown).

pub mod child;
pub mod digest;
pub mod fs;
pub mod mangle;
pub mod process_lock;
