//! Fruitbak's backup storage engine: a content-addressed chunk pool
//! (`fbk-datastore`), share transfer providers (`fbk-client`), and the
//! orchestration layer tying them together — backup runs (C8), expiry
//! decisions (C11) and garbage collection (C12).
//!
//! This crate is the single root handle's home (§9 "Global mutable
//! state"): [`Root`] carries the pool, configuration and Fruitbak-wide
//! lock that every other operation here borrows rather than reaching for
//! through globals.

pub mod backup;
pub mod expiry;
pub mod gc;
pub mod root;

pub use backup::{run_host_backup, BackupInfo, BackupOptions};
pub use expiry::{evaluate as evaluate_expiry, BackupRecord};
pub use gc::run_gc;
pub use root::Root;
